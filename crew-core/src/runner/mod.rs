//! Worker process lifecycle
//!
//! [`ProcessRunner`] launches one CLI worker per stage or dispatch, decodes
//! its stdout into [`StreamChunk`](crate::parser::StreamChunk)s, and
//! guarantees the process is reaped whether it finishes, is stopped, or
//! times out.

mod launcher;
mod manager;
mod process;
mod terminate;

pub use launcher::{ClaudeLauncher, WorkerLauncher, WorkerSpec};
pub use manager::{ProcessRunner, RunnerConfig};
pub use process::{ExitReason, WorkerExit, WorkerHandle, WorkerProcess};
