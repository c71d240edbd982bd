//! Event system for crew
//!
//! Engines publish [`CrewEvent`]s to an [`EventBus`]; observers either
//! register handlers, take the live broadcast stream, or replay history.

mod bus;
mod memory;
mod types;

pub use bus::{EventBus, EventHandler, EventSeq, SubscriptionId, handler};
pub use memory::MemoryEventBus;
pub use types::CrewEvent;
