//! Whole-engine tests against real trees under the system temp dir.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::expr::{Action, EvalCtx, Expr, ExprKind, Optimizer, Test, evaluate};
use crate::fmt::FormatProgram;
use crate::fs::FileKind;
use crate::util::{Diagnostics, Resources, buffer_contents, buffer_sink};
use crate::walk::{Follow, VisitPhase, WalkOptions, WalkVerdict, Walker};

type Record = (String, VisitPhase, usize, FileKind, i32);

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("bfind_test_{name}"));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn collect(root: &Path, opts: WalkOptions) -> Vec<Record> {
    let mut walker = Walker::new(opts);
    let mut out: Vec<Record> = Vec::new();
    walker
        .walk(root.as_os_str().as_encoded_bytes(), &mut |visit| {
            out.push((
                String::from_utf8_lossy(visit.path()).into_owned(),
                visit.phase(),
                visit.depth(),
                visit.kind(),
                visit.errno(),
            ));
            WalkVerdict::Continue
        })
        .unwrap();
    out
}

fn run_bfind(args: &[&str]) -> i32 {
    let argv: Vec<OsString> = args.iter().map(OsString::from).collect();
    crate::run(&argv)
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn chain_emits_shallow_first() {
    let root = scratch("chain");
    fs::create_dir(root.join("b")).unwrap();
    fs::write(root.join("b/c"), "").unwrap();

    let records = collect(&root, WalkOptions::new());
    let paths: Vec<&str> = records.iter().map(|r| r.0.as_str()).collect();
    let display = root.display();
    assert_eq!(
        paths,
        vec![
            format!("{display}"),
            format!("{display}/b"),
            format!("{display}/b/c"),
        ]
    );
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn strict_bfs_across_depths() {
    let root = scratch("levels");
    fs::write(root.join("x"), "").unwrap();
    fs::write(root.join("y"), "").unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/z"), "").unwrap();

    let records = collect(&root, WalkOptions::new());
    assert_eq!(records.len(), 5);
    // every entry at depth d comes before any entry at depth d + 1
    let depths: Vec<usize> = records.iter().map(|r| r.2).collect();
    for pair in depths.windows(2) {
        assert!(pair[1] >= pair[0], "visits out of level order: {records:?}");
    }
    assert!(records.last().unwrap().0.ends_with("sub/z"));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn non_directory_root_is_one_visit() {
    let root = scratch("one_file");
    let file = root.join("only");
    fs::write(&file, "data").unwrap();

    let records = collect(&file, WalkOptions::new().post_order(true));
    assert_eq!(records.len(), 1);
    let (ref path, phase, depth, kind, _) = records[0];
    assert_eq!(path, &file.display().to_string());
    assert_eq!(phase, VisitPhase::Pre);
    assert_eq!(depth, 0);
    assert_eq!(kind, FileKind::Regular);
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn empty_directory_pre_and_post() {
    let root = scratch("empty_dir");
    let records = collect(&root, WalkOptions::new().post_order(true));
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].1, VisitPhase::Pre);
    assert_eq!(records[1].1, VisitPhase::Post);
    assert_eq!(records[0].0, records[1].0);
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn post_order_fires_after_all_descendants() {
    let root = scratch("post_order");
    fs::create_dir_all(root.join("a/b")).unwrap();
    fs::write(root.join("a/b/f"), "").unwrap();
    fs::create_dir(root.join("c")).unwrap();

    let records = collect(&root, WalkOptions::new().post_order(true));
    let post_of = |needle: &str| {
        records
            .iter()
            .position(|r| r.0.ends_with(needle) && r.1 == VisitPhase::Post)
            .unwrap()
    };
    let last_under = |needle: &str| {
        records
            .iter()
            .rposition(|r| r.0.contains(needle) && r.1 == VisitPhase::Pre)
            .unwrap()
    };
    assert!(post_of("a") > last_under("a/b/f"));
    assert!(post_of("a/b") > last_under("a/b/f"));
    // the root's post visit is the very last record
    assert_eq!(records.last().unwrap().1, VisitPhase::Post);
    assert_eq!(records.last().unwrap().2, 0);
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn anchor_and_relative_path_resolve_to_same_inode() {
    let root = scratch("anchor");
    fs::create_dir_all(root.join("d1/d2")).unwrap();
    fs::write(root.join("d1/f"), "x").unwrap();
    fs::write(root.join("d1/d2/g"), "y").unwrap();

    let mut walker = Walker::new(WalkOptions::new());
    walker
        .walk(root.as_os_str().as_encoded_bytes(), &mut |visit| {
            let through_anchor = visit.stat().unwrap();
            let through_path =
                fs::symlink_metadata(String::from_utf8_lossy(visit.path()).as_ref()).unwrap();
            use std::os::unix::fs::MetadataExt as _;
            assert_eq!(through_anchor.st_ino, through_path.ino());
            WalkVerdict::Continue
        })
        .unwrap();
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn symlink_loop_is_reported_not_expanded() {
    let root = scratch("cycle");
    fs::create_dir(root.join("sub")).unwrap();
    symlink(&root, root.join("sub/back")).unwrap();

    let records = collect(&root, WalkOptions::new().follow(Follow::Always));
    let errors: Vec<&Record> = records.iter().filter(|r| r.3 == FileKind::Error).collect();
    assert_eq!(errors.len(), 1, "{records:?}");
    assert!(errors[0].0.ends_with("sub/back"));
    assert_eq!(errors[0].4, libc::ELOOP);
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn followed_directory_symlinks_are_descended() {
    let root = scratch("follow");
    fs::create_dir(root.join("real")).unwrap();
    fs::write(root.join("real/file"), "").unwrap();
    symlink(root.join("real"), root.join("ln")).unwrap();

    let plain = collect(&root, WalkOptions::new());
    assert!(
        plain
            .iter()
            .any(|r| r.0.ends_with("/ln") && r.3 == FileKind::Link)
    );
    assert!(!plain.iter().any(|r| r.0.ends_with("ln/file")));

    let followed = collect(&root, WalkOptions::new().follow(Follow::Always));
    assert!(followed.iter().any(|r| r.0.ends_with("ln/file")));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn broken_symlink_keeps_its_link_type() {
    let root = scratch("dangling");
    symlink("no/such/file", root.join("dangling")).unwrap();

    for opts in [
        WalkOptions::new(),
        WalkOptions::new().follow(Follow::Always),
    ] {
        let records = collect(&root, opts);
        let link = records
            .iter()
            .find(|r| r.0.ends_with("dangling"))
            .unwrap();
        assert_eq!(link.3, FileKind::Link);
    }
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn type_filter_matches_only_files() {
    let root = scratch("type_f");
    fs::create_dir(root.join("b")).unwrap();
    fs::write(root.join("b/c"), "").unwrap();
    let out = root.join("out.txt");

    let status = run_bfind(&[
        root.to_str().unwrap(),
        "-type",
        "f",
        "-fprint",
        out.to_str().unwrap(),
    ]);
    assert_eq!(status, 0);
    let lines = read_lines(&out);
    // out.txt itself is created before the walk, so it shows up too
    let expected = format!("{}/b/c", root.display());
    assert!(lines.contains(&expected), "{lines:?}");
    assert!(lines.iter().all(|l| !l.ends_with("/b")));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn depth_window_options() {
    let root = scratch("depths");
    fs::create_dir_all(root.join("d1/d2")).unwrap();
    fs::write(root.join("f1"), "").unwrap();
    fs::write(root.join("d1/f2"), "").unwrap();
    fs::write(root.join("d1/d2/f3"), "").unwrap();
    let shallow = root.join("shallow.txt");
    let deep = root.join("deep.txt");

    run_bfind(&[
        root.to_str().unwrap(),
        "-maxdepth",
        "1",
        "-fprint",
        shallow.to_str().unwrap(),
    ]);
    let lines = read_lines(&shallow);
    assert!(lines.iter().any(|l| l.ends_with("/f1")));
    assert!(lines.iter().any(|l| l.ends_with("/d1")));
    assert!(!lines.iter().any(|l| l.contains("/d1/")));

    run_bfind(&[
        root.to_str().unwrap(),
        "-mindepth",
        "2",
        "-fprint",
        deep.to_str().unwrap(),
    ]);
    let lines = read_lines(&deep);
    assert!(lines.iter().all(|l| l.contains("/d1/")), "{lines:?}");
    assert!(lines.iter().any(|l| l.ends_with("/d2/f3")));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn delete_removes_matches_bottom_up() {
    let root = scratch("delete");
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("x.tmp"), "").unwrap();
    fs::write(root.join("sub/y.tmp"), "").unwrap();
    fs::write(root.join("keep.txt"), "").unwrap();

    let status = run_bfind(&[root.to_str().unwrap(), "-name", "*.tmp", "-delete"]);
    assert_eq!(status, 0);
    assert!(!root.join("x.tmp").exists());
    assert!(!root.join("sub/y.tmp").exists());
    assert!(root.join("keep.txt").exists());

    // deleting everything needs children to go before parents
    let victim = scratch("delete_all");
    fs::create_dir_all(victim.join("a/b")).unwrap();
    fs::write(victim.join("a/b/f"), "").unwrap();
    let status = run_bfind(&[victim.to_str().unwrap(), "-delete"]);
    assert_eq!(status, 0);
    assert!(!victim.exists());
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn exec_gates_on_child_status() {
    let root = scratch("exec");
    fs::write(root.join("f"), "").unwrap();
    let all = root.join("all.txt");
    let none = root.join("none.txt");

    run_bfind(&[
        root.to_str().unwrap(),
        "-maxdepth",
        "0",
        "-exec",
        "true",
        ";",
        "-fprint",
        all.to_str().unwrap(),
    ]);
    assert_eq!(read_lines(&all).len(), 1);

    let status = run_bfind(&[
        root.to_str().unwrap(),
        "-maxdepth",
        "0",
        "-exec",
        "false",
        ";",
        "-fprint",
        none.to_str().unwrap(),
    ]);
    assert_eq!(status, 0);
    assert_eq!(read_lines(&none).len(), 0);
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn fprintf_expands_depth_and_name() {
    let root = scratch("fprintf");
    fs::write(root.join("inner"), "").unwrap();
    let out = root.join("fmt.out");

    run_bfind(&[
        root.to_str().unwrap(),
        "-fprintf",
        out.to_str().unwrap(),
        "%d %f\n",
    ]);
    let lines = read_lines(&out);
    assert!(lines.contains(&"0 bfind_test_fprintf".to_owned()), "{lines:?}");
    assert!(lines.contains(&"1 inner".to_owned()));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn printf_path_and_size() {
    let root = scratch("printf_size");
    let file = root.join("f");
    fs::write(&file, "7 bytes").unwrap();

    let program = FormatProgram::compile(b"%p %s\n").unwrap();
    let res = Resources::new();
    let mut out: Vec<u8> = Vec::new();
    let mut walker = Walker::new(WalkOptions::new());
    walker
        .walk(file.as_os_str().as_encoded_bytes(), &mut |visit| {
            program.run(visit, &res, &mut out).unwrap();
            WalkVerdict::Continue
        })
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        format!("{} 7\n", file.display())
    );
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn printf_path_directive_equals_print_action() {
    let root = scratch("printf_vs_print");
    fs::write(root.join("f"), "").unwrap();

    let program = FormatProgram::compile(b"%p\n").unwrap();
    let res = Resources::new();
    let diag = Diagnostics::new("test");
    let sink = buffer_sink();
    let print = Expr::new(ExprKind::Act(Action::Print {
        sink: sink.clone(),
        null: false,
    }));

    let mut formatted: Vec<u8> = Vec::new();
    let mut walker = Walker::new(WalkOptions::new());
    walker
        .walk(root.as_os_str().as_encoded_bytes(), &mut |visit| {
            program.run(visit, &res, &mut formatted).unwrap();
            let mut ctx = EvalCtx::new(visit, &diag, &res, false);
            assert!(evaluate(&print, &mut ctx));
            WalkVerdict::Continue
        })
        .unwrap();
    assert_eq!(formatted, buffer_contents(&sink));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn alternation_prints_each_match_once() {
    let root = scratch("alternation");
    for name in ["a", "b", "c"] {
        fs::write(root.join(name), "").unwrap();
    }

    let opt = Optimizer::new(1);
    let sink = buffer_sink();
    let name = |pat: &str| {
        Expr::new(ExprKind::Test(Test::Name {
            pattern: pat.into(),
            re: crate::expr::glob_to_regex(pat.as_bytes(), false).unwrap(),
            ci: false,
        }))
    };
    let expr = opt.and(
        opt.or(name("a"), name("b")),
        Expr::new(ExprKind::Act(Action::Print {
            sink: sink.clone(),
            null: false,
        })),
    );

    let diag = Diagnostics::new("test");
    let res = Resources::new();
    let mut walker = Walker::new(WalkOptions::new());
    walker
        .walk(root.as_os_str().as_encoded_bytes(), &mut |visit| {
            let mut ctx = EvalCtx::new(visit, &diag, &res, false);
            let _ = evaluate(&expr, &mut ctx);
            ctx.verdict
        })
        .unwrap();

    let output = String::from_utf8(buffer_contents(&sink)).unwrap();
    let mut lines: Vec<&str> = output.lines().collect();
    lines.sort_unstable();
    assert_eq!(
        lines,
        vec![
            format!("{}/a", root.display()),
            format!("{}/b", root.display()),
        ]
    );
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn quit_stops_the_walk() {
    let root = scratch("quit");
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("sub/deep"), "").unwrap();

    let quit = Expr::new(ExprKind::Act(Action::Quit));
    let diag = Diagnostics::new("test");
    let res = Resources::new();
    let mut visits = 0;
    let mut walker = Walker::new(WalkOptions::new());
    let outcome = walker
        .walk(root.as_os_str().as_encoded_bytes(), &mut |visit| {
            visits += 1;
            let mut ctx = EvalCtx::new(visit, &diag, &res, false);
            let _ = evaluate(&quit, &mut ctx);
            ctx.verdict
        })
        .unwrap();
    assert_eq!(outcome, crate::walk::WalkOutcome::Stopped);
    assert_eq!(visits, 1);
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn prune_skips_the_subtree() {
    let root = scratch("prune");
    fs::create_dir(root.join("skip")).unwrap();
    fs::write(root.join("skip/hidden_away"), "").unwrap();
    fs::write(root.join("kept"), "").unwrap();
    let out = root.join("out.txt");

    run_bfind(&[
        root.to_str().unwrap(),
        "(",
        "-name",
        "skip",
        "-prune",
        ")",
        "-o",
        "-type",
        "f",
        "-fprint",
        out.to_str().unwrap(),
    ]);
    let lines = read_lines(&out);
    assert!(lines.iter().any(|l| l.ends_with("/kept")));
    assert!(!lines.iter().any(|l| l.contains("hidden_away")), "{lines:?}");
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn exit_codes() {
    let missing = std::env::temp_dir().join("bfind_test_no_such_root");
    let _ = fs::remove_dir_all(&missing);
    assert_eq!(run_bfind(&[missing.to_str().unwrap()]), 1);
    assert_eq!(run_bfind(&[".", "-maxdepth", "0", "-frobnicate"]), 2);
}

#[test]
fn empty_test_and_hidden_test() {
    let root = scratch("empty_hidden");
    fs::create_dir(root.join("void")).unwrap();
    fs::create_dir(root.join("full")).unwrap();
    fs::write(root.join("full/data"), "x").unwrap();
    fs::write(root.join("zero"), "").unwrap();
    fs::write(root.join(".dotfile"), "x").unwrap();
    let empties = root.join("empties.txt");
    let hiddens = root.join("hiddens.txt");

    run_bfind(&[
        root.to_str().unwrap(),
        "-empty",
        "-fprint",
        empties.to_str().unwrap(),
    ]);
    let lines = read_lines(&empties);
    assert!(lines.iter().any(|l| l.ends_with("/void")));
    assert!(lines.iter().any(|l| l.ends_with("/zero")));
    assert!(!lines.iter().any(|l| l.ends_with("/full")));

    run_bfind(&[
        root.to_str().unwrap(),
        "-hidden",
        "-fprint",
        hiddens.to_str().unwrap(),
    ]);
    let lines = read_lines(&hiddens);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("/.dotfile"));
    let _ = fs::remove_dir_all(&root);
}

#[test]
fn multiple_roots_walk_in_sequence() {
    let first = scratch("roots_first");
    let second = scratch("roots_second");
    fs::write(first.join("f1"), "").unwrap();
    fs::write(second.join("f2"), "").unwrap();
    let out = first.join("out.txt");

    run_bfind(&[
        first.to_str().unwrap(),
        second.to_str().unwrap(),
        "-type",
        "f",
        "-fprint",
        out.to_str().unwrap(),
    ]);
    let lines = read_lines(&out);
    let f1 = lines.iter().position(|l| l.ends_with("/f1")).unwrap();
    let f2 = lines.iter().position(|l| l.ends_with("/f2")).unwrap();
    assert!(f1 < f2);
    let _ = fs::remove_dir_all(&first);
    let _ = fs::remove_dir_all(&second);
}
