//! Per-visit expansion of compiled directives.

use std::io::{self, Write};

use chrono::{DateTime, Datelike as _, Local, TimeZone as _, Timelike as _};

use crate::fmt::{Field, Spec, TimeShape};
use crate::fs::FileKind;
use crate::util::{Resources, bytes};
use crate::walk::Visit;

pub(crate) enum Rendered {
    Num(i64),
    Oct(u32),
    Str(Vec<u8>),
    Float(f64),
}

/// Extract one field. Only the stat-backed fields touch the (cached)
/// stat, and they fall back to zero or empty when it failed; the failure
/// itself was already reported once by the evaluator.
pub(crate) fn field_value(field: Field, visit: &Visit<'_>, res: &Resources) -> Rendered {
    let num = |f: fn(&libc::stat) -> i64| Rendered::Num(visit.stat().ok().as_ref().map_or(0, f));
    match field {
        Field::Depth => Rendered::Num(visit.depth() as i64),
        Field::Device => num(|st| st.st_dev as i64),
        Field::Basename => Rendered::Str(visit.name().to_vec()),
        Field::FsType => {
            let name = visit
                .stat()
                .ok()
                .and_then(|st| res.fs_type(st.st_dev))
                .unwrap_or_else(|| "unknown".into());
            Rendered::Str(name.into_boxed_bytes().into_vec())
        }
        Field::Group => {
            let gid = visit.stat().ok().map_or(0, |st| st.st_gid);
            match res.group_name(gid) {
                Some(name) => Rendered::Str(name.into_boxed_bytes().into_vec()),
                None => Rendered::Str(gid.to_string().into_bytes()),
            }
        }
        Field::Gid => num(|st| i64::from(st.st_gid)),
        Field::Dirname => Rendered::Str(bytes::dirname(visit.path()).to_vec()),
        Field::Root => Rendered::Str(visit.root().to_vec()),
        Field::Inode => num(|st| st.st_ino as i64),
        Field::BlocksK => num(|st| ((st.st_blocks.max(0) * 512) as u64).div_ceil(1024) as i64),
        Field::Blocks512 => num(|st| st.st_blocks.max(0)),
        Field::LinkTarget => {
            if visit.kind_refined() == FileKind::Link {
                Rendered::Str(visit.link_target().unwrap_or_default())
            } else {
                Rendered::Str(Vec::new())
            }
        }
        Field::ModeOctal => Rendered::Oct(visit.stat().ok().map_or(0, |st| st.st_mode & 0o7777)),
        Field::ModeSymbolic => {
            Rendered::Str(symbolic_mode(visit.stat().ok().map_or(0, |st| st.st_mode)))
        }
        Field::NLink => num(|st| st.st_nlink as i64),
        Field::Path => Rendered::Str(visit.path().to_vec()),
        Field::PathFromRoot => {
            Rendered::Str(bytes::strip_root(visit.path(), visit.root()).to_vec())
        }
        Field::Size => num(|st| st.st_size),
        Field::Sparseness => {
            let (blocks, size) = visit
                .stat()
                .ok()
                .map_or((0, 0), |st| (st.st_blocks.max(0), st.st_size.max(0)));
            if size == 0 {
                Rendered::Float(1.0)
            } else {
                Rendered::Float(blocks as f64 * 512.0 / size as f64)
            }
        }
        Field::User => {
            let uid = visit.stat().ok().map_or(0, |st| st.st_uid);
            match res.user_name(uid) {
                Some(name) => Rendered::Str(name.into_boxed_bytes().into_vec()),
                None => Rendered::Str(uid.to_string().into_bytes()),
            }
        }
        Field::Uid => num(|st| i64::from(st.st_uid)),
        Field::TypeChar => Rendered::Str(vec![visit.kind_refined().type_char()]),
        Field::XTypeChar => {
            let c = match visit.target_kind() {
                Ok(kind) => kind.type_char(),
                Err(libc::ENOENT) => b'N',
                Err(libc::ELOOP) => b'L',
                Err(_) => b'?',
            };
            Rendered::Str(vec![c])
        }
        Field::Time { field, shape } => {
            let (secs, nanos) = visit.stat().ok().map_or((0, 0), |st| field.of(&st));
            let text = match shape {
                TimeShape::Ctime => ctime_style(secs, nanos),
                TimeShape::Sub(sub) => time_sub(sub, secs, nanos),
            };
            Rendered::Str(text.into_bytes())
        }
    }
}

/// Apply flags, width and precision, then write.
pub(crate) fn write_padded(
    out: &mut dyn Write,
    spec: &Spec,
    value: Rendered,
) -> io::Result<()> {
    let (body, numeric) = match value {
        Rendered::Str(mut s) => {
            if let Some(precision) = spec.precision {
                s.truncate(precision);
            }
            (s, false)
        }
        Rendered::Num(n) => (format_int(spec, n), true),
        Rendered::Oct(m) => (format_oct(spec, m), true),
        Rendered::Float(v) => (format_float(spec, v), true),
    };
    let width = spec.width.unwrap_or(0);
    if body.len() >= width {
        return out.write_all(&body);
    }
    let pad = width - body.len();
    if spec.minus {
        out.write_all(&body)?;
        write_repeat(out, b' ', pad)
    } else if spec.zero && numeric {
        // the sign stays in front of the zeros
        let sign_len = body
            .first()
            .filter(|&&b| b == b'-' || b == b'+' || b == b' ')
            .map_or(0, |_| 1);
        out.write_all(&body[..sign_len])?;
        write_repeat(out, b'0', pad)?;
        out.write_all(&body[sign_len..])
    } else {
        write_repeat(out, b' ', pad)?;
        out.write_all(&body)
    }
}

fn write_repeat(out: &mut dyn Write, byte: u8, count: usize) -> io::Result<()> {
    const CHUNK: [u8; 32] = [b' '; 32];
    const ZEROS: [u8; 32] = [b'0'; 32];
    let chunk = if byte == b'0' { &ZEROS } else { &CHUNK };
    let mut left = count;
    while left > 0 {
        let n = left.min(chunk.len());
        out.write_all(&chunk[..n])?;
        left -= n;
    }
    Ok(())
}

fn format_int(spec: &Spec, n: i64) -> Vec<u8> {
    let mut digits = n.unsigned_abs().to_string();
    if let Some(precision) = spec.precision
        && digits.len() < precision
    {
        digits = format!("{}{digits}", "0".repeat(precision - digits.len()));
    }
    let mut body = String::new();
    if n < 0 {
        body.push('-');
    } else if spec.plus {
        body.push('+');
    } else if spec.space {
        body.push(' ');
    }
    body.push_str(&digits);
    body.into_bytes()
}

fn format_oct(spec: &Spec, m: u32) -> Vec<u8> {
    let mut digits = format!("{m:o}");
    if let Some(precision) = spec.precision
        && digits.len() < precision
    {
        digits = format!("{}{digits}", "0".repeat(precision - digits.len()));
    }
    if spec.hash && !digits.starts_with('0') {
        digits.insert(0, '0');
    }
    digits.into_bytes()
}

fn format_float(spec: &Spec, v: f64) -> Vec<u8> {
    let mut body = match spec.precision {
        Some(precision) => format!("{v:.precision$}"),
        None => format!("{v}"),
    };
    if spec.plus && !body.starts_with('-') {
        body.insert(0, '+');
    } else if spec.space && !body.starts_with('-') {
        body.insert(0, ' ');
    }
    body.into_bytes()
}

/// `-rwxr-xr-x` style permissions with the file kind in front.
fn symbolic_mode(mode: libc::mode_t) -> Vec<u8> {
    let kind = match mode & libc::S_IFMT {
        libc::S_IFDIR => b'd',
        libc::S_IFLNK => b'l',
        libc::S_IFCHR => b'c',
        libc::S_IFBLK => b'b',
        libc::S_IFIFO => b'p',
        libc::S_IFSOCK => b's',
        libc::S_IFREG => b'-',
        _ => b'?',
    };
    let mut out = vec![kind];
    let rwx = [(mode >> 6) & 7, (mode >> 3) & 7, mode & 7];
    for (i, bits) in rwx.into_iter().enumerate() {
        out.push(if bits & 4 != 0 { b'r' } else { b'-' });
        out.push(if bits & 2 != 0 { b'w' } else { b'-' });
        let special = match i {
            0 => mode & libc::S_ISUID != 0,
            1 => mode & libc::S_ISGID != 0,
            _ => mode & libc::S_ISVTX != 0,
        };
        let execute = bits & 1 != 0;
        out.push(match (special, execute, i) {
            (false, false, _) => b'-',
            (false, true, _) => b'x',
            (true, false, 2) => b'T',
            (true, true, 2) => b't',
            (true, false, _) => b'S',
            (true, true, _) => b's',
        });
    }
    out
}

fn local_time(secs: i64, nanos: i64) -> Option<DateTime<Local>> {
    Local
        .timestamp_opt(secs, nanos.clamp(0, 999_999_999) as u32)
        .single()
}

/// The fixed shape of `%a`/`%c`/`%t`, ctime-like with a ten-digit
/// fractional second: nine nanosecond digits plus a trailing zero, kept
/// for output compatibility with the reference tools.
fn ctime_style(secs: i64, nanos: i64) -> String {
    match local_time(secs, nanos) {
        Some(dt) => format!(
            "{}.{:09}0 {}",
            dt.format("%a %b %e %H:%M:%S"),
            nanos,
            dt.year()
        ),
        None => secs.to_string(),
    }
}

fn time_sub(sub: char, secs: i64, nanos: i64) -> String {
    if sub == '@' {
        return format!("{secs}.{nanos:09}0");
    }
    let Some(dt) = local_time(secs, nanos) else {
        return secs.to_string();
    };
    match sub {
        '+' => format!("{}.{nanos:09}0", dt.format("%Y-%m-%d+%H:%M:%S")),
        'S' => format!("{:02}.{nanos:09}0", dt.second()),
        'T' => format!(
            "{:02}:{:02}:{:02}.{nanos:09}0",
            dt.hour(),
            dt.minute(),
            dt.second()
        ),
        _ => dt.format(&format!("%{sub}")).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(spec: &Spec, value: Rendered) -> String {
        let mut out = Vec::new();
        write_padded(&mut out, spec, value).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn numeric_padding() {
        let spec = Spec {
            width: Some(5),
            ..Spec::default()
        };
        assert_eq!(padded(&spec, Rendered::Num(42)), "   42");
        let spec = Spec {
            width: Some(5),
            zero: true,
            ..Spec::default()
        };
        assert_eq!(padded(&spec, Rendered::Num(-42)), "-0042");
        let spec = Spec {
            width: Some(5),
            minus: true,
            ..Spec::default()
        };
        assert_eq!(padded(&spec, Rendered::Num(42)), "42   ");
        let spec = Spec {
            plus: true,
            ..Spec::default()
        };
        assert_eq!(padded(&spec, Rendered::Num(7)), "+7");
    }

    #[test]
    fn string_precision_truncates() {
        let spec = Spec {
            precision: Some(3),
            ..Spec::default()
        };
        assert_eq!(padded(&spec, Rendered::Str(b"abcdef".to_vec())), "abc");
    }

    #[test]
    fn octal_hash_prefix() {
        let spec = Spec {
            hash: true,
            ..Spec::default()
        };
        assert_eq!(padded(&spec, Rendered::Oct(0o644)), "0644");
        assert_eq!(padded(&Spec::default(), Rendered::Oct(0o644)), "644");
    }

    #[test]
    fn symbolic_modes() {
        assert_eq!(symbolic_mode(libc::S_IFDIR | 0o755), b"drwxr-xr-x".to_vec());
        assert_eq!(symbolic_mode(libc::S_IFREG | 0o640), b"-rw-r-----".to_vec());
        assert_eq!(
            symbolic_mode(libc::S_IFREG | libc::S_ISUID | 0o755),
            b"-rwsr-xr-x".to_vec()
        );
        assert_eq!(
            symbolic_mode(libc::S_IFDIR | libc::S_ISVTX | 0o777),
            b"drwxrwxrwt".to_vec()
        );
    }

    #[test]
    fn epoch_directive_keeps_ten_digit_fraction() {
        assert_eq!(time_sub('@', 1700000000, 123456789), "1700000000.1234567890");
        assert_eq!(time_sub('@', 0, 0), "0.0000000000");
    }
}
