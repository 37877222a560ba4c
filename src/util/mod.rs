pub mod bytes;
mod diag;
mod resources;
mod sink;

pub use diag::Diagnostics;
pub use resources::{Resources, group_id, user_id};
#[cfg(test)]
pub use sink::{buffer_contents, buffer_sink};
pub use sink::{Sink, SinkRef, Sinks};
