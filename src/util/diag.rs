//! Stderr reporting and exit-status tracking.

use core::cell::Cell;
use core::fmt;

/// The single diagnostics sink for a run.
///
/// Every recoverable error is routed through here so the final exit status
/// reflects the first failure even when the walk carries on. Status only
/// ever ratchets upwards.
#[derive(Debug)]
pub struct Diagnostics {
    prog: Box<str>,
    status: Cell<i32>,
}

impl Diagnostics {
    #[must_use]
    pub fn new(prog: &str) -> Self {
        Self {
            prog: prog.into(),
            status: Cell::new(0),
        }
    }

    /// Report a path-level failure by errno and record exit status 1.
    pub fn report_errno(&self, path: &[u8], errno: i32) {
        eprintln!(
            "{}: '{}': {}",
            self.prog,
            String::from_utf8_lossy(path),
            std::io::Error::from_raw_os_error(errno)
        );
        self.raise(1);
    }

    /// Report a failure that is not tied to a path.
    pub fn error(&self, message: fmt::Arguments<'_>) {
        eprintln!("{}: {}", self.prog, message);
        self.raise(1);
    }

    /// A note on stderr that does not affect the exit status.
    pub fn warn(&self, message: fmt::Arguments<'_>) {
        eprintln!("{}: warning: {}", self.prog, message);
    }

    pub fn raise(&self, code: i32) {
        if self.status.get() < code {
            self.status.set(code);
        }
    }

    #[must_use]
    pub fn status(&self) -> i32 {
        self.status.get()
    }
}
