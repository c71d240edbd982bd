//! Agent definitions and the name → definition registry
//!
//! Definitions are authored elsewhere (see crew-cli's config loader); the core
//! only consumes fully resolved [`AgentDefinition`] values.

pub mod definition;
pub mod registry;

pub use definition::AgentDefinition;
pub use registry::{AgentRegistry, SharedRegistry};
