//! Task sessions and the task state machine
//!
//! A [`TaskSession`] is owned by its task's engine; the [`TaskManager`] hands
//! out [`TaskSnapshot`]s and routes stop requests through [`TaskControl`].

mod control;
mod manager;
mod state;
mod types;

pub use control::TaskControl;
pub use manager::{TaskManager, TaskRequest};
pub use state::{COORDINATOR_STAGE, StageSnapshot, TaskSession, TaskSnapshot, format_duration};
pub use types::{DispatchRecord, StageStatus, Strategy, TaskId, TaskState, UNATTRIBUTED_ROLE};
