//! Exec module: run Codex and stream its events.

mod bridge;
mod error;
mod events;
mod framer;
mod lifecycle;
mod process;
mod queue;

pub use bridge::*;
pub use error::*;
pub use events::*;
pub use framer::*;
pub use lifecycle::*;
pub use process::*;
pub use queue::*;
