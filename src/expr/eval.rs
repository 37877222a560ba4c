use std::io::Write as _;
use std::time::Instant;

use crate::expr::node::{Action, Expr, ExprKind, ModeCmp, Test};
use crate::fs::{self, DirFd, DirStream, FileKind};
use crate::util::{Diagnostics, Resources};
use crate::walk::{Visit, VisitPhase, WalkVerdict};

/// Short-lived evaluation state for one visit.
///
/// The verdict and quit flag are how actions steer the walker: `-prune`
/// becomes a skipped subtree, `-quit` a stop. Everything else lives for
/// exactly one callback.
pub struct EvalCtx<'a, 'w> {
    pub visit: &'a Visit<'w>,
    pub diag: &'a Diagnostics,
    pub res: &'a Resources,
    pub verdict: WalkVerdict,
    pub quit: bool,
    pub profile: bool,
}

impl<'a, 'w> EvalCtx<'a, 'w> {
    #[must_use]
    pub fn new(
        visit: &'a Visit<'w>,
        diag: &'a Diagnostics,
        res: &'a Resources,
        profile: bool,
    ) -> Self {
        Self {
            visit,
            diag,
            res,
            verdict: WalkVerdict::Continue,
            quit: false,
            profile,
        }
    }

    /// Lazy stat with one-shot error reporting; a test that cannot stat
    /// evaluates false.
    fn stat(&self) -> Option<libc::stat> {
        match self.visit.stat() {
            Ok(st) => Some(st),
            Err(errno) => {
                if !self.visit.stat_reported.replace(true) {
                    self.diag.report_errno(self.visit.path(), errno);
                }
                None
            }
        }
    }

    fn write_failed(&mut self, err: &std::io::Error) {
        self.diag.error(format_args!("write error: {err}"));
        self.quit = true;
        self.verdict = WalkVerdict::Stop;
    }
}

/// Evaluate `expr` against the context's visit.
///
/// Boolean operators short-circuit left to right and re-check the quit
/// flag between operands, so `-quit` stops even mid-expression.
pub fn evaluate(expr: &Expr, ctx: &mut EvalCtx<'_, '_>) -> bool {
    let started = ctx.profile.then(Instant::now);
    let value = match *expr.kind() {
        ExprKind::True => true,
        ExprKind::False => false,
        ExprKind::Not(ref x) => !evaluate(x, ctx),
        ExprKind::And(ref l, ref r) => {
            if !evaluate(l, ctx) || ctx.quit {
                false
            } else {
                evaluate(r, ctx)
            }
        }
        ExprKind::Or(ref l, ref r) => {
            if evaluate(l, ctx) {
                true
            } else if ctx.quit {
                false
            } else {
                evaluate(r, ctx)
            }
        }
        ExprKind::Comma(ref l, ref r) => {
            let _ = evaluate(l, ctx);
            if ctx.quit { false } else { evaluate(r, ctx) }
        }
        ExprKind::Test(ref test) => eval_test(test, ctx),
        ExprKind::Act(ref action) => eval_action(action, ctx),
    };
    expr.record(value, started.map(|t| t.elapsed()));
    value
}

fn eval_test(test: &Test, ctx: &mut EvalCtx<'_, '_>) -> bool {
    let visit = ctx.visit;
    match *test {
        Test::Name { ref re, .. } => re.is_match(visit.name()),
        Test::Path { ref re, .. } => re.is_match(visit.path()),
        Test::LinkName { ref re, .. } => {
            visit.kind_refined() == FileKind::Link
                && visit.link_target().is_ok_and(|target| re.is_match(&target))
        }
        Test::RegexMatch { ref re, .. } => re.is_match(visit.path()),
        Test::Kind { mask, .. } => visit.kind_refined().mask_bit() & mask != 0,
        Test::FsType { ref name } => ctx.stat().is_some_and(|st| {
            match ctx.res.fs_type(st.st_dev) {
                Some(fstype) => *fstype == **name,
                None => &**name == "unknown",
            }
        }),
        Test::XKind { mask, .. } => match visit.target_kind() {
            Ok(kind) => kind.mask_bit() & mask != 0,
            // an unresolvable target still proves there was a link
            Err(libc::ENOENT | libc::ELOOP) => FileKind::Link.mask_bit() & mask != 0,
            Err(_) => false,
        },
        Test::Perm { mode, how } => ctx.stat().is_some_and(|st| {
            let bits = st.st_mode & 0o7777;
            match how {
                ModeCmp::Exact => bits == mode,
                ModeCmp::AllBits => bits & mode == mode,
                ModeCmp::AnyBits => mode == 0 || bits & mode != 0,
            }
        }),
        Test::Size { n, cmp, unit } => ctx.stat().is_some_and(|st| {
            let size = st.st_size.max(0) as u64;
            let rounded = size.div_ceil(unit.bytes());
            cmp.matches(rounded as i64, n as i64)
        }),
        Test::Links { n, cmp } => ctx
            .stat()
            .is_some_and(|st| cmp.matches(st.st_nlink as i64, n as i64)),
        Test::Inode { n, cmp } => ctx
            .stat()
            .is_some_and(|st| cmp.matches(st.st_ino as i64, n as i64)),
        Test::Uid { n, cmp } => ctx
            .stat()
            .is_some_and(|st| cmp.matches(i64::from(st.st_uid), i64::from(n))),
        Test::Gid { n, cmp } => ctx
            .stat()
            .is_some_and(|st| cmp.matches(i64::from(st.st_gid), i64::from(n))),
        Test::NoUser => ctx
            .stat()
            .is_some_and(|st| ctx.res.user_name(st.st_uid).is_none()),
        Test::NoGroup => ctx
            .stat()
            .is_some_and(|st| ctx.res.group_name(st.st_gid).is_none()),
        Test::Hidden => visit.is_hidden(),
        Test::Empty => match visit.kind_refined() {
            FileKind::Regular => ctx.stat().is_some_and(|st| st.st_size == 0),
            FileKind::Dir => dir_is_empty(ctx),
            _ => false,
        },
        Test::TimeCount {
            field,
            unit_secs,
            n,
            cmp,
            reference,
        } => ctx.stat().is_some_and(|st| {
            let (secs, _) = field.of(&st);
            let periods = (reference - secs).div_euclid(unit_secs);
            cmp.matches(periods, n)
        }),
        Test::NewerThan {
            field, secs, nanos, ..
        } => ctx.stat().is_some_and(|st| {
            let (fsecs, fnanos) = field.of(&st);
            (fsecs, fnanos) > (secs, nanos)
        }),
        Test::SameFile { dev, ino, .. } => ctx
            .stat()
            .is_some_and(|st| st.st_dev == dev && st.st_ino == ino),
        Test::Sparse => ctx
            .stat()
            .is_some_and(|st| st.st_blocks.saturating_mul(512) < st.st_size),
        Test::Access { mode, .. } => {
            fs::access_at(visit.anchor_fd(), visit.rel_path(), mode, visit.follow)
        }
    }
}

/// The `-empty` directory check: open and look for one real entry. This
/// is what the descriptor headroom in the cache budget pays for.
fn dir_is_empty(ctx: &mut EvalCtx<'_, '_>) -> bool {
    let visit = ctx.visit;
    let fd = match DirFd::open_at(visit.anchor_fd(), visit.rel_path()) {
        Ok(fd) => fd,
        Err(err) => {
            ctx.diag
                .report_errno(visit.path(), err.raw_os_error().unwrap_or(libc::EIO));
            return false;
        }
    };
    let mut stream = DirStream::new(fd);
    match stream.next_entry() {
        Ok(None) => true,
        Ok(Some(_)) => false,
        Err(err) => {
            ctx.diag
                .report_errno(visit.path(), err.raw_os_error().unwrap_or(libc::EIO));
            false
        }
    }
}

fn eval_action(action: &Action, ctx: &mut EvalCtx<'_, '_>) -> bool {
    let visit = ctx.visit;
    match *action {
        Action::Print { ref sink, null } => {
            let terminator: &[u8] = if null { b"\0" } else { b"\n" };
            let mut sink = sink.borrow_mut();
            let result = sink
                .write_all(visit.path())
                .and_then(|()| sink.write_all(terminator));
            drop(sink);
            if let Err(err) = result {
                ctx.write_failed(&err);
            }
            true
        }
        Action::Printf {
            ref sink,
            ref program,
        } => {
            if program.needs_stat() {
                // fault in the stat now so failures are reported once
                let _ = ctx.stat();
            }
            let result = program.run(visit, ctx.res, &mut *sink.borrow_mut());
            if let Err(err) = result {
                ctx.write_failed(&err);
            }
            true
        }
        Action::Delete => {
            if visit.name() == b"." {
                ctx.diag
                    .error(format_args!("refusing to delete '.'"));
                return false;
            }
            let is_dir = visit.kind_refined() == FileKind::Dir;
            match fs::unlink_at(visit.anchor_fd(), visit.rel_path(), is_dir) {
                Ok(()) => true,
                Err(err) => {
                    ctx.diag
                        .report_errno(visit.path(), err.raw_os_error().unwrap_or(libc::EIO));
                    false
                }
            }
        }
        Action::Exec(ref spec) => {
            if spec.batched() {
                spec.push(visit.path(), ctx.diag)
            } else {
                spec.run_one(visit.path(), ctx.diag)
            }
        }
        Action::Prune => {
            if visit.phase() == VisitPhase::Pre {
                ctx.verdict = WalkVerdict::SkipSubtree;
            }
            true
        }
        Action::Quit => {
            ctx.quit = true;
            ctx.verdict = WalkVerdict::Stop;
            true
        }
        Action::NoHidden => {
            if visit.is_hidden() {
                if visit.phase() == VisitPhase::Pre {
                    ctx.verdict = WalkVerdict::SkipSubtree;
                }
                false
            } else {
                true
            }
        }
    }
}
