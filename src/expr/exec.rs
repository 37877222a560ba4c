use core::cell::{Cell, RefCell};
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt as _, OsStringExt as _};
use std::process::Command;

use crate::util::Diagnostics;

/// The subprocess template behind `-exec`.
///
/// One-shot specs substitute every standalone or embedded `{}` and spawn
/// per entry; batched specs (`{} +`) accumulate paths until the argv
/// budget fills, spawn, and always evaluate true. Stdio is inherited so
/// children talk to the user's terminal directly.
#[derive(Debug)]
pub struct ExecSpec {
    template: Vec<OsString>,
    spelled: Box<str>,
    batch: bool,
    pending: RefCell<Vec<OsString>>,
    pending_bytes: Cell<usize>,
    limit: usize,
}

impl ExecSpec {
    /// `template` is the argv with `{}` markers; for batched specs the
    /// trailing `{}` has already been stripped by the parser.
    #[must_use]
    pub fn new(template: Vec<OsString>, batch: bool) -> Self {
        let spelled = template
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
            .into_boxed_str();
        Self {
            template,
            spelled,
            batch,
            pending: RefCell::new(Vec::new()),
            pending_bytes: Cell::new(0),
            limit: argv_budget(),
        }
    }

    #[must_use]
    pub const fn batched(&self) -> bool {
        self.batch
    }

    #[must_use]
    pub fn spelled(&self) -> &str {
        &self.spelled
    }

    /// Spawn once for `path`; the result is the test's value.
    pub fn run_one(&self, path: &[u8], diag: &Diagnostics) -> bool {
        let argv: Vec<OsString> = self
            .template
            .iter()
            .map(|arg| substitute(arg, path))
            .collect();
        self.spawn(&argv, diag)
    }

    /// Queue `path` for a batched spawn. Always true.
    pub fn push(&self, path: &[u8], diag: &Diagnostics) -> bool {
        self.pending
            .borrow_mut()
            .push(OsString::from_vec(path.to_vec()));
        self.pending_bytes.set(self.pending_bytes.get() + path.len() + 1);
        if self.pending_bytes.get() >= self.limit {
            self.flush(diag);
        }
        true
    }

    /// Spawn whatever is queued. A failing child raises the exit status
    /// but does not interrupt the walk.
    pub fn flush(&self, diag: &Diagnostics) {
        let paths = core::mem::take(&mut *self.pending.borrow_mut());
        self.pending_bytes.set(0);
        if paths.is_empty() {
            return;
        }
        let mut argv = self.template.clone();
        argv.extend(paths);
        if !self.spawn(&argv, diag) {
            diag.raise(1);
        }
    }

    fn spawn(&self, argv: &[OsString], diag: &Diagnostics) -> bool {
        let Some((prog, args)) = argv.split_first() else {
            return false;
        };
        match Command::new(prog).args(args).status() {
            Ok(status) => status.success(),
            Err(err) => {
                diag.error(format_args!(
                    "cannot run '{}': {err}",
                    prog.to_string_lossy()
                ));
                false
            }
        }
    }
}

/// Replace every `{}` occurrence inside one template argument.
fn substitute(arg: &OsStr, path: &[u8]) -> OsString {
    let bytes = arg.as_bytes();
    if !bytes.windows(2).any(|w| w == b"{}") {
        return arg.to_owned();
    }
    let mut out = Vec::with_capacity(bytes.len() + path.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"{}") {
            out.extend_from_slice(path);
            i += 2;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    OsString::from_vec(out)
}

/// Half of `ARG_MAX`, clamped to something sane, leaving the other half
/// for the environment and the template itself.
fn argv_budget() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions
    let arg_max = unsafe { libc::sysconf(libc::_SC_ARG_MAX) };
    if arg_max > 0 {
        ((arg_max as usize) / 2).min(2 * 1024 * 1024)
    } else {
        128 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_hits_every_marker() {
        let arg = OsString::from("pre{}post{}");
        let got = substitute(&arg, b"X");
        assert_eq!(got, OsString::from("preXpostX"));
        let plain = OsString::from("nothing");
        assert_eq!(substitute(&plain, b"X"), plain);
    }

    #[test]
    fn one_shot_reports_child_status() {
        let diag = Diagnostics::new("bfind");
        let truthy = ExecSpec::new(vec!["true".into()], false);
        assert!(truthy.run_one(b"ignored", &diag));
        let falsy = ExecSpec::new(vec!["false".into()], false);
        assert!(!falsy.run_one(b"ignored", &diag));
        assert_eq!(diag.status(), 0);
    }

    #[test]
    fn batch_failure_raises_status() {
        let diag = Diagnostics::new("bfind");
        let spec = ExecSpec::new(vec!["false".into()], true);
        assert!(spec.push(b"a", &diag));
        spec.flush(&diag);
        assert_eq!(diag.status(), 1);
    }
}
