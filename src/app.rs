//! The driver: argv in, exit code out.
//!
//! Everything between the parser and the walker lives here: wiring the
//! evaluator in as the walk callback, the depth-window policy, the
//! post-order evaluation rule for `-depth`, and the end-of-run flushes.

use std::ffi::OsString;

use crate::expr::{self, Cmdline, EvalCtx, evaluate};
use crate::fs::FileKind;
use crate::util::{Diagnostics, Resources, Sinks};
use crate::walk::{
    VisitPhase, Visit, WalkOptions, WalkOutcome, WalkVerdict, Walker, suggested_capacity,
};

/// Run with the arguments after argv[0].
///
/// Exit codes: 0 clean, 1 when any traversal or evaluation error was
/// recorded, 2 for usage errors caught before the walk starts.
pub fn run(args: &[OsString]) -> i32 {
    let diag = Diagnostics::new("bfind");
    let mut sinks = Sinks::new();
    let cmdline = match expr::parse(args, &mut sinks) {
        Ok(cmdline) => cmdline,
        Err(err) => {
            diag.error(format_args!("{err}"));
            return 2;
        }
    };
    if cmdline.debug.tree {
        eprintln!("bfind: -O{}: {}", cmdline.opt_level, cmdline.expr);
    }

    let res = Resources::new();
    execute(&cmdline, &sinks, &diag, &res);

    cmdline.expr.finish(&diag);
    if let Err(err) = sinks.flush_all() {
        diag.error(format_args!("write error: {err}"));
    }
    if cmdline.debug.rates {
        let _ = cmdline.expr.dump_rates(&mut std::io::stderr(), 0);
    }
    diag.status()
}

/// Walk every root in order with one shared walker.
pub(crate) fn execute(cmdline: &Cmdline, sinks: &Sinks, diag: &Diagnostics, res: &Resources) {
    let opts = WalkOptions::new()
        .follow(cmdline.follow)
        .same_device(cmdline.same_device)
        .post_order(cmdline.post_order)
        .ignore_races(cmdline.ignore_races)
        .always_stat(cmdline.stat_all)
        .capacity(suggested_capacity(sinks.open_files()));
    let mut walker = Walker::new(opts);

    for root in &cmdline.roots {
        let outcome = walker.walk(root, &mut |visit| drive(cmdline, diag, res, visit));
        match outcome {
            Ok(WalkOutcome::Done) => {}
            Ok(WalkOutcome::Stopped) => break,
            Err(err) => {
                // only reachable with recovery off; preserve the errno
                diag.report_errno(&err.path, err.errno);
            }
        }
    }
}

/// The per-visit callback: apply the depth window, pick the evaluation
/// phase, and translate the evaluation context back into a verdict.
pub(crate) fn drive(
    cmdline: &Cmdline,
    diag: &Diagnostics,
    res: &Resources,
    visit: &Visit<'_>,
) -> WalkVerdict {
    if cmdline.debug.search {
        eprintln!(
            "bfind: visit {:?} depth {} {:?}",
            String::from_utf8_lossy(visit.path()),
            visit.depth(),
            visit.phase(),
        );
    }
    if visit.kind() == FileKind::Error {
        diag.report_errno(visit.path(), visit.errno());
        return WalkVerdict::Continue;
    }

    let depth = visit.depth();
    let at_limit = cmdline.max_depth.is_some_and(|max| depth >= max);

    // under -depth a directory evaluates on its post-order visit, except
    // when the depth ceiling means that visit will never come
    if cmdline.post_order
        && visit.phase() == VisitPhase::Pre
        && visit.kind_refined() == FileKind::Dir
        && !at_limit
    {
        return WalkVerdict::Continue;
    }
    if depth < cmdline.min_depth {
        return if at_limit {
            WalkVerdict::SkipSubtree
        } else {
            WalkVerdict::Continue
        };
    }

    let mut ctx = EvalCtx::new(visit, diag, res, cmdline.debug.rates);
    let _ = evaluate(&cmdline.expr, &mut ctx);
    if ctx.quit {
        return WalkVerdict::Stop;
    }
    if at_limit && ctx.verdict == WalkVerdict::Continue {
        return WalkVerdict::SkipSubtree;
    }
    ctx.verdict
}
