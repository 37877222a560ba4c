use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;

use crate::fs::fd::cstr;

/// `fstatat` relative to an anchor descriptor.
///
/// `follow` selects whether a trailing symlink is resolved; everything the
/// walker and evaluator learn about a file funnels through here.
pub fn stat_at(anchor: RawFd, rel: &[u8], follow: bool) -> io::Result<libc::stat> {
    let cpath = cstr(rel)?;
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    let mut buf = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: cpath is NUL terminated, buf is writable for a full stat
    let rc = unsafe { libc::fstatat(anchor, cpath.as_ptr(), buf.as_mut_ptr(), flags) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fstatat returned 0, so buf is initialised
    Ok(unsafe { buf.assume_init() })
}

/// Stat honouring follow semantics with the broken-link fallback.
///
/// Following a dangling symlink reports ENOENT even though the link itself
/// exists; retrying without following lets the caller record a symlink
/// instead of an error. The bool says whether the link was resolved.
pub fn stat_entry(anchor: RawFd, rel: &[u8], follow: bool) -> io::Result<(libc::stat, bool)> {
    if follow {
        match stat_at(anchor, rel, true) {
            Ok(st) => return Ok((st, true)),
            Err(ref err) if err.raw_os_error() == Some(libc::ENOENT) => {}
            Err(err) => return Err(err),
        }
    }
    stat_at(anchor, rel, false).map(|st| (st, false))
}

/// `readlinkat` into an owned buffer.
pub fn read_link_at(anchor: RawFd, rel: &[u8]) -> io::Result<Vec<u8>> {
    let cpath = cstr(rel)?;
    let mut buf = vec![0_u8; libc::PATH_MAX as usize];
    loop {
        // SAFETY: cpath is NUL terminated, buf is writable for its length
        let n = unsafe {
            libc::readlinkat(anchor, cpath.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        let n = n as usize;
        if n < buf.len() {
            buf.truncate(n);
            return Ok(buf);
        }
        // target did not fit, try again with more room
        buf.resize(buf.len() * 2, 0);
    }
}

/// Kernel-side access check for `-readable` and friends.
#[must_use]
pub fn access_at(anchor: RawFd, rel: &[u8], mode: libc::c_int, follow: bool) -> bool {
    let Ok(cpath) = cstr(rel) else { return false };
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    // SAFETY: cpath is NUL terminated
    unsafe { libc::faccessat(anchor, cpath.as_ptr(), mode, flags) == 0 }
}

/// `unlinkat`, used by the delete action.
pub fn unlink_at(anchor: RawFd, rel: &[u8], dir: bool) -> io::Result<()> {
    let cpath = cstr(rel)?;
    let flags = if dir { libc::AT_REMOVEDIR } else { 0 };
    // SAFETY: cpath is NUL terminated
    let rc = unsafe { libc::unlinkat(anchor, cpath.as_ptr(), flags) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fd::AT_CWD;
    use crate::fs::file_kind::FileKind;
    use std::fs;
    use std::os::unix::fs::symlink;

    #[test]
    fn broken_link_falls_back() {
        let dir = std::env::temp_dir().join("bfind_stat_test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let link = dir.join("dangling");
        symlink("no/such/target", &link).unwrap();

        let rel = link.as_os_str().as_encoded_bytes();
        let (st, followed) = stat_entry(AT_CWD, rel, true).unwrap();
        assert!(!followed);
        assert_eq!(FileKind::from_mode(st.st_mode), FileKind::Link);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn read_link_round_trip() {
        let dir = std::env::temp_dir().join("bfind_readlink_test");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let link = dir.join("ln");
        symlink("target/path", &link).unwrap();

        let got = read_link_at(AT_CWD, link.as_os_str().as_encoded_bytes()).unwrap();
        assert_eq!(got, b"target/path");
        let _ = fs::remove_dir_all(&dir);
    }
}
