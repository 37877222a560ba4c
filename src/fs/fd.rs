use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

/// The anchor meaning "resolve relative to the working directory".
pub const AT_CWD: RawFd = libc::AT_FDCWD;

/// An owned directory descriptor.
///
/// Closed on drop on every path, including the error branches of the
/// walker. The cache hands out the raw value for `openat`-family anchors
/// while keeping ownership here.
#[derive(Debug)]
pub struct DirFd(RawFd);

impl DirFd {
    /// Open a directory relative to `anchor` with close-on-exec and
    /// directory-only flags.
    pub fn open_at(anchor: RawFd, rel: &[u8]) -> io::Result<Self> {
        let cpath = cstr(rel)?;
        // SAFETY: cpath is NUL terminated and outlives the call
        let fd = unsafe {
            libc::openat(
                anchor,
                cpath.as_ptr(),
                libc::O_RDONLY | libc::O_CLOEXEC | libc::O_DIRECTORY,
            )
        };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(Self(fd))
        }
    }

    /// Duplicate the descriptor so a readdir stream can consume one copy
    /// while the original stays cached for future relative opens.
    pub fn duplicate(&self) -> io::Result<Self> {
        // SAFETY: self.0 is open for the lifetime of self
        let fd = unsafe { libc::fcntl(self.0, libc::F_DUPFD_CLOEXEC, 0) };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(Self(fd))
        }
    }

    #[must_use]
    #[inline]
    pub const fn raw(&self) -> RawFd {
        self.0
    }
}

impl Drop for DirFd {
    fn drop(&mut self) {
        // SAFETY: we own the descriptor; errors on close are unrecoverable
        unsafe { libc::close(self.0) };
    }
}

/// NUL-terminate a byte path for the syscall layer.
pub fn cstr(bytes: &[u8]) -> io::Result<CString> {
    CString::new(bytes).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}
