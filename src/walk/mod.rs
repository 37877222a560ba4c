mod cache;
mod frontier;
mod visit;
mod walker;

pub use visit::{Visit, VisitPhase, WalkVerdict};
pub use walker::{Follow, WalkOptions, WalkOutcome, Walker, suggested_capacity};
