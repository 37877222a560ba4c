//! The `-printf` format language: compiled once, run per visit.
//!
//! A format string becomes an ordered list of pieces, each a literal byte
//! run or a typed field directive carrying its printf-style spec. All
//! validation happens at compile time so the per-file interpreter never
//! sees a malformed directive.

mod render;

use std::io::{self, Write};

use crate::error::ParseError;
use crate::expr::TimeField;
use crate::util::Resources;
use crate::walk::Visit;

/// Flags, width and precision of one `%` directive.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Spec {
    pub(crate) minus: bool,
    pub(crate) zero: bool,
    pub(crate) plus: bool,
    pub(crate) space: bool,
    pub(crate) hash: bool,
    pub(crate) width: Option<usize>,
    pub(crate) precision: Option<usize>,
}

/// The two shapes a time directive takes: the fixed ctime-like string of
/// `%t`, or one `strftime`-style subfield of `%{A,C,T}X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeShape {
    Ctime,
    Sub(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Depth,
    Device,
    Basename,
    FsType,
    Group,
    Gid,
    Dirname,
    Root,
    Inode,
    BlocksK,
    Blocks512,
    LinkTarget,
    ModeOctal,
    ModeSymbolic,
    NLink,
    Path,
    PathFromRoot,
    Size,
    Sparseness,
    User,
    Uid,
    TypeChar,
    XTypeChar,
    Time { field: TimeField, shape: TimeShape },
}

impl Field {
    /// String substitutions reject the numeric flags.
    const fn is_string(self) -> bool {
        matches!(
            self,
            Self::Basename
                | Self::FsType
                | Self::Group
                | Self::Dirname
                | Self::Root
                | Self::LinkTarget
                | Self::ModeSymbolic
                | Self::Path
                | Self::PathFromRoot
                | Self::User
                | Self::TypeChar
                | Self::XTypeChar
                | Self::Time { .. }
        )
    }

    const fn needs_stat(self) -> bool {
        matches!(
            self,
            Self::Device
                | Self::FsType
                | Self::Group
                | Self::Gid
                | Self::Inode
                | Self::BlocksK
                | Self::Blocks512
                | Self::ModeOctal
                | Self::ModeSymbolic
                | Self::NLink
                | Self::Size
                | Self::Sparseness
                | Self::User
                | Self::Uid
                | Self::XTypeChar
                | Self::Time { .. }
        )
    }
}

#[derive(Debug)]
pub(crate) enum Piece {
    Literal(Vec<u8>),
    /// `\c`: flush and stop processing the remaining pieces.
    Stop,
    Field { spec: Spec, field: Field },
}

/// A compiled format program.
#[derive(Debug)]
pub struct FormatProgram {
    pieces: Vec<Piece>,
    needs_stat: bool,
    source: Box<str>,
}

/// Subfield letters accepted after `%A`, `%C` and `%T`. The non-POSIX
/// extras: `@` (epoch with a ten-digit fractional field), `+` (date and
/// time joined by `+`), `k`/`l` (space-padded hours) and `S` (seconds
/// with the nanosecond fraction).
const TIME_SUBS: &[u8] = b"@+aAbBcCdDeFgGhHIjklmMprRsSTuUVwWxXyYzZ";

impl FormatProgram {
    /// Compile a format string, validating every escape and directive.
    pub fn compile(source: &[u8]) -> Result<Self, ParseError> {
        let mut pieces = Vec::new();
        let mut literal: Vec<u8> = Vec::new();
        let mut needs_stat = false;
        let mut i = 0;

        while i < source.len() {
            match source[i] {
                b'\\' => {
                    i += 1;
                    match parse_escape(source, &mut i)? {
                        Escape::Byte(b) => literal.push(b),
                        Escape::Stop => {
                            flush_literal(&mut pieces, &mut literal);
                            pieces.push(Piece::Stop);
                        }
                    }
                }
                b'%' => {
                    i += 1;
                    if source.get(i) == Some(&b'%') {
                        literal.push(b'%');
                        i += 1;
                        continue;
                    }
                    let (spec, field) = parse_directive(source, &mut i)?;
                    needs_stat |= field.needs_stat();
                    flush_literal(&mut pieces, &mut literal);
                    pieces.push(Piece::Field { spec, field });
                }
                b => {
                    literal.push(b);
                    i += 1;
                }
            }
        }
        flush_literal(&mut pieces, &mut literal);

        Ok(Self {
            pieces,
            needs_stat,
            source: String::from_utf8_lossy(source).into_owned().into_boxed_str(),
        })
    }

    /// Whether any directive reads stat data.
    #[must_use]
    pub const fn needs_stat(&self) -> bool {
        self.needs_stat
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expand the program for one visit into `out`.
    pub fn run(
        &self,
        visit: &Visit<'_>,
        res: &Resources,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        for piece in &self.pieces {
            match *piece {
                Piece::Literal(ref bytes) => out.write_all(bytes)?,
                Piece::Stop => {
                    out.flush()?;
                    return Ok(());
                }
                Piece::Field { ref spec, ref field } => {
                    let value = render::field_value(*field, visit, res);
                    render::write_padded(out, spec, value)?;
                }
            }
        }
        Ok(())
    }
}

fn flush_literal(pieces: &mut Vec<Piece>, literal: &mut Vec<u8>) {
    if !literal.is_empty() {
        pieces.push(Piece::Literal(core::mem::take(literal)));
    }
}

enum Escape {
    Byte(u8),
    Stop,
}

fn parse_escape(source: &[u8], i: &mut usize) -> Result<Escape, ParseError> {
    let Some(&b) = source.get(*i) else {
        return Err(ParseError::InvalidFormat {
            directive: "\\".into(),
            reason: "incomplete escape",
        });
    };
    *i += 1;
    let byte = match b {
        b'a' => 0x07,
        b'b' => 0x08,
        b'f' => 0x0c,
        b'n' => b'\n',
        b'r' => b'\r',
        b't' => b'\t',
        b'v' => 0x0b,
        b'\\' => b'\\',
        b'c' => return Ok(Escape::Stop),
        b'0'..=b'7' => {
            let mut value = u32::from(b - b'0');
            let mut taken = 1;
            while taken < 3
                && let Some(&d) = source.get(*i)
                && d.is_ascii_digit()
                && d < b'8'
            {
                value = value * 8 + u32::from(d - b'0');
                *i += 1;
                taken += 1;
            }
            (value & 0xff) as u8
        }
        other => {
            return Err(ParseError::InvalidFormat {
                directive: format!("\\{}", other as char),
                reason: "unknown escape",
            });
        }
    };
    Ok(Escape::Byte(byte))
}

fn parse_directive(source: &[u8], i: &mut usize) -> Result<(Spec, Field), ParseError> {
    let start = *i;
    let mut spec = Spec::default();

    loop {
        let Some(&b) = source.get(*i) else { break };
        let slot = match b {
            b'-' => &mut spec.minus,
            b'0' => &mut spec.zero,
            b'+' => &mut spec.plus,
            b' ' => &mut spec.space,
            b'#' => &mut spec.hash,
            _ => break,
        };
        if *slot {
            return Err(ParseError::InvalidFormat {
                directive: directive_text(source, start, *i),
                reason: "duplicate flag",
            });
        }
        *slot = true;
        *i += 1;
    }
    if let Some(width) = take_number(source, i) {
        spec.width = Some(width);
    }
    if source.get(*i) == Some(&b'.') {
        *i += 1;
        spec.precision = Some(take_number(source, i).unwrap_or(0));
    }

    let Some(&letter) = source.get(*i) else {
        return Err(ParseError::InvalidFormat {
            directive: directive_text(source, start, *i),
            reason: "incomplete directive",
        });
    };
    *i += 1;

    let field = match letter {
        b'a' => Field::Time { field: TimeField::Accessed, shape: TimeShape::Ctime },
        b'c' => Field::Time { field: TimeField::Changed, shape: TimeShape::Ctime },
        b't' => Field::Time { field: TimeField::Modified, shape: TimeShape::Ctime },
        b'A' | b'C' | b'T' => {
            let Some(&sub) = source.get(*i) else {
                return Err(ParseError::InvalidFormat {
                    directive: directive_text(source, start, *i),
                    reason: "incomplete time directive",
                });
            };
            *i += 1;
            if !TIME_SUBS.contains(&sub) {
                return Err(ParseError::InvalidFormat {
                    directive: directive_text(source, start, *i),
                    reason: "unknown time subfield",
                });
            }
            let field = match letter {
                b'A' => TimeField::Accessed,
                b'C' => TimeField::Changed,
                _ => TimeField::Modified,
            };
            Field::Time { field, shape: TimeShape::Sub(sub as char) }
        }
        b'b' => Field::Blocks512,
        b'd' => Field::Depth,
        b'D' => Field::Device,
        b'f' => Field::Basename,
        b'F' => Field::FsType,
        b'g' => Field::Group,
        b'G' => Field::Gid,
        b'h' => Field::Dirname,
        b'H' => Field::Root,
        b'i' => Field::Inode,
        b'k' => Field::BlocksK,
        b'l' => Field::LinkTarget,
        b'm' => Field::ModeOctal,
        b'M' => Field::ModeSymbolic,
        b'n' => Field::NLink,
        b'p' => Field::Path,
        b'P' => Field::PathFromRoot,
        b's' => Field::Size,
        b'S' => Field::Sparseness,
        b'u' => Field::User,
        b'U' => Field::Uid,
        b'y' => Field::TypeChar,
        b'Y' => Field::XTypeChar,
        _ => {
            return Err(ParseError::InvalidFormat {
                directive: directive_text(source, start, *i),
                reason: "unknown directive",
            });
        }
    };

    if field.is_string() && (spec.zero || spec.plus || spec.space || spec.hash) {
        return Err(ParseError::InvalidFormat {
            directive: directive_text(source, start, *i),
            reason: "numeric flags on a string directive",
        });
    }
    if spec.hash && field != Field::ModeOctal {
        return Err(ParseError::InvalidFormat {
            directive: directive_text(source, start, *i),
            reason: "'#' only applies to the octal mode",
        });
    }
    Ok((spec, field))
}

fn take_number(source: &[u8], i: &mut usize) -> Option<usize> {
    let start = *i;
    while source.get(*i).is_some_and(u8::is_ascii_digit) {
        *i += 1;
    }
    if *i == start {
        return None;
    }
    core::str::from_utf8(&source[start..*i])
        .ok()
        .and_then(|digits| digits.parse().ok())
}

fn directive_text(source: &[u8], start: usize, end: usize) -> String {
    let end = end.min(source.len());
    format!("%{}", String::from_utf8_lossy(&source[start..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> Result<FormatProgram, ParseError> {
        FormatProgram::compile(src.as_bytes())
    }

    #[test]
    fn literals_and_escapes() {
        let program = compile("a\\tb\\n\\101\\\\").unwrap();
        assert!(!program.needs_stat());
        match program.pieces.as_slice() {
            [Piece::Literal(bytes)] => assert_eq!(bytes, b"a\tb\nA\\"),
            other => panic!("unexpected pieces: {other:?}"),
        }
    }

    #[test]
    fn percent_literal_and_stop() {
        let program = compile("100%%\\cdone").unwrap();
        assert!(matches!(program.pieces[1], Piece::Stop));
    }

    #[test]
    fn stat_inference() {
        assert!(!compile("%p %f %d\n").unwrap().needs_stat());
        assert!(compile("%p %s\n").unwrap().needs_stat());
        assert!(compile("%TY\n").unwrap().needs_stat());
    }

    #[test]
    fn directive_validation() {
        assert!(compile("%q").is_err());
        assert!(compile("%").is_err());
        assert!(compile("%T").is_err());
        assert!(compile("%T!").is_err());
        assert!(compile("\\q").is_err());
        // duplicate flag
        assert!(compile("%--5s").is_err());
        // numeric flags are for numbers, not strings
        assert!(compile("%05p").is_err());
        assert!(compile("%+f").is_err());
        // but fine on numeric fields
        assert!(compile("%05s").is_ok());
        assert!(compile("%#m").is_ok());
        assert!(compile("%#s").is_err());
    }

    #[test]
    fn width_and_precision_parse() {
        let program = compile("%-10.3f").unwrap();
        match program.pieces.as_slice() {
            [Piece::Field { spec, field }] => {
                assert!(spec.minus);
                assert_eq!(spec.width, Some(10));
                assert_eq!(spec.precision, Some(3));
                assert_eq!(*field, Field::Basename);
            }
            other => panic!("unexpected pieces: {other:?}"),
        }
    }
}
