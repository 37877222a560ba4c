mod eval;
mod exec;
mod glob;
mod node;
mod optimize;
mod parse;

pub use eval::{EvalCtx, evaluate};
pub use exec::ExecSpec;
pub use glob::glob_to_regex;
pub use node::{Action, Expr, ExprKind, ModeCmp, NumCmp, SizeUnit, Test, TimeField};
pub use optimize::Optimizer;
pub use parse::{Cmdline, DebugFlags, parse};
