/*!
 A breadth-first file-tree search library and the engine behind the
 `bfind` binary.

 Where the classic tool dives depth-first, this walker discovers files
 level by level, so shallow matches surface before the deep ones. The
 expression surface stays find-compatible: tests and actions combined
 with short-circuit operators, simplified by an optimizer before the
 walk starts.

 The moving parts:
 - [`walk`]: the breadth-first walker, its frontier queue and the bounded
   cache of open directory descriptors that keeps every syscall a short
   relative `openat`
 - [`expr`]: the expression tree, optimizer, evaluator and the
   command-line parser that produces the tree
 - [`fmt`]: compiled `-printf` programs
 - [`fs`]: the thin syscall layer (getdents64, fstatat, readlinkat)

 # Examples
 ```no_run
 use bfind::{WalkOptions, WalkVerdict, Walker};

 let mut walker = Walker::new(WalkOptions::new());
 let mut seen = 0_u64;
 walker
     .walk(b".", &mut |visit| {
         seen += 1;
         println!("{}", String::from_utf8_lossy(visit.path()));
         WalkVerdict::Continue
     })
     .expect("walk failed");
 println!("visited {seen} entries");
 ```
*/

mod app;
pub mod error;
pub mod expr;
pub mod fmt;
pub mod fs;
pub mod util;
pub mod walk;

#[cfg(test)]
mod test;

pub use app::run;
pub use error::{ParseError, Result, WalkError};
pub use expr::{Cmdline, Expr, parse};
pub use fmt::FormatProgram;
pub use fs::FileKind;
pub use walk::{Follow, Visit, VisitPhase, WalkOptions, WalkOutcome, WalkVerdict, Walker};

// measurably ahead of the system allocator on deep trees full of small
// path buffers
#[cfg(all(feature = "mimalloc", any(target_os = "linux", target_os = "android")))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;
