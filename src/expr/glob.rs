//! Shell glob compilation for the name and path tests.
//!
//! Patterns are translated to anchored byte regexes so matching shares the
//! one engine the `-regex` tests already pull in:
//! - `*` matches any run of bytes, `?` a single byte (neither is given
//!   pathname semantics: the name tests see basenames, and the path tests
//!   deliberately match across slashes)
//! - `[...]` classes support ranges and `!`/`^` negation, with `]` allowed
//!   literally as the first member
//! - `\` escapes the next byte; a trailing backslash is an error
//! - an unterminated `[` is matched literally

use regex::bytes::Regex;

use crate::error::ParseError;

/// Compile one glob into an anchored `Regex`.
pub fn glob_to_regex(pattern: &[u8], case_insensitive: bool) -> Result<Regex, ParseError> {
    let flags = if case_insensitive { "(?si-u)" } else { "(?s-u)" };
    let mut out = String::with_capacity(pattern.len() * 2 + 8);
    out.push_str(flags);
    out.push_str("\\A(?:");

    let mut i = 0;
    while i < pattern.len() {
        match pattern[i] {
            b'*' => out.push_str(".*"),
            b'?' => out.push('.'),
            b'\\' => {
                i += 1;
                match pattern.get(i) {
                    Some(&b) => push_literal(&mut out, b),
                    None => return Err(ParseError::InvalidGlob(lossy(pattern))),
                }
            }
            b'[' => i = push_class(&mut out, pattern, i),
            b => push_literal(&mut out, b),
        }
        i += 1;
    }
    out.push_str(")\\z");
    Regex::new(&out).map_err(|_| ParseError::InvalidGlob(lossy(pattern)))
}

/// Translate a `[...]` class starting at `start`; returns the index of the
/// closing bracket, or `start` when the class never closes and the `[`
/// should be taken literally.
fn push_class(out: &mut String, pattern: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some(&b'!') | Some(&b'^'));
    if negated {
        i += 1;
    }
    // a ] right after the (possibly negated) opener is a literal member
    let body_start = i;
    if pattern.get(i) == Some(&b']') {
        i += 1;
    }
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' {
            i += 1;
        }
        i += 1;
    }
    if i >= pattern.len() {
        push_literal(out, b'[');
        return start;
    }

    out.push('[');
    if negated {
        out.push('^');
    }
    let mut j = body_start;
    while j < i {
        let b = pattern[j];
        if b == b'\\' && j + 1 < i {
            j += 1;
            push_class_literal(out, pattern[j]);
        } else if b == b'-' && j != body_start && j + 1 != i {
            out.push('-');
        } else {
            push_class_literal(out, b);
        }
        j += 1;
    }
    out.push(']');
    i
}

fn push_literal(out: &mut String, b: u8) {
    match b {
        b'.' | b'^' | b'$' | b'*' | b'+' | b'?' | b'(' | b')' | b'[' | b']' | b'{' | b'}'
        | b'|' | b'\\' => {
            out.push('\\');
            out.push(b as char);
        }
        0x20..=0x7e => out.push(b as char),
        _ => push_hex(out, b),
    }
}

fn push_class_literal(out: &mut String, b: u8) {
    match b {
        b'\\' | b']' | b'^' | b'[' | b'-' => {
            out.push('\\');
            out.push(b as char);
        }
        0x20..=0x7e => out.push(b as char),
        _ => push_hex(out, b),
    }
}

fn push_hex(out: &mut String, b: u8) {
    out.push_str(&format!("\\x{b:02x}"));
}

fn lossy(pattern: &[u8]) -> String {
    String::from_utf8_lossy(pattern).into_owned()
}
