//! crew-core: orchestration core for teams of CLI coding agents
//!
//! This crate runs multi-stage tasks across independent worker processes:
//!
//! - **Agent registry** - [`AgentRegistry`] maps role names to [`AgentDefinition`]s
//! - **Process runner** - [`ProcessRunner`] launches, streams, stops and reaps workers
//! - **Stream parser** - [`parser::parse`] turns stream-json lines into [`StreamChunk`]s
//! - **Handoff context** - [`HandoffContext`] builds each stage's prompt from earlier outputs
//! - **Engines** - Pipeline, Team and Auto strategies in [`engine`]
//! - **Task sessions** - [`TaskManager`] for submit, status, stop and wait
//! - **Event system** - [`EventBus`] trait and [`MemoryEventBus`] for progress events
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use crew_core::{
//!     AgentDefinition, AgentRegistry, ClaudeLauncher, MemoryEventBus, OrchestratorConfig,
//!     SharedRegistry, TaskManager, TaskRequest,
//! };
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = AgentRegistry::from_definitions([
//!         AgentDefinition::new("product", "Write a short brief.", 10),
//!         AgentDefinition::new("development", "Implement the brief.", 40),
//!     ])?;
//!     let config = OrchestratorConfig::default();
//!     let manager = TaskManager::new(
//!         SharedRegistry::new(registry),
//!         Arc::new(ClaudeLauncher::new(config.worker.clone())),
//!         Arc::new(MemoryEventBus::default()),
//!         config,
//!     );
//!
//!     let id = manager
//!         .submit(TaskRequest::pipeline("Add a health endpoint", ["product", "development"]))
//!         .await?;
//!     println!("{}", manager.wait(&id).await?.summary());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   TaskManager                    │
//! │  ┌────────────────────────────────────────────┐  │
//! │  │  Engine (Pipeline | Team | Auto)           │  │
//! │  │   ┌──────────────┐   ┌─────────────────┐   │  │
//! │  │   │ HandoffCtx   │   │ DispatchBackend │   │  │
//! │  │   └──────────────┘   └─────────────────┘   │  │
//! │  └───────────────────┬────────────────────────┘  │
//! │                      │                           │
//! │  ┌───────────────────▼────────────────────────┐  │
//! │  │ ProcessRunner → worker → StreamChunk       │  │
//! │  └───────────────────┬────────────────────────┘  │
//! │                      ▼                           │
//! │                  EventBus                        │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod handoff;
pub mod parser;
pub mod runner;
pub mod session;

// Re-export key types for convenience
pub use agent::{AgentDefinition, AgentRegistry, SharedRegistry};
pub use config::{AdHocConfig, CoordinatorConfig, DispatchMode, OrchestratorConfig, WorkerConfig};
pub use engine::dispatch::{DISPATCH_URL_ENV, DispatchRequest, DispatchResponse, TASK_ID_ENV};
pub use error::{CrewError, CrewResult, DispatchError, RegistryError, RunnerError, TaskError};
pub use events::{CrewEvent, EventBus, MemoryEventBus};
pub use handoff::HandoffContext;
pub use parser::StreamChunk;
pub use runner::{ClaudeLauncher, ProcessRunner, WorkerLauncher, WorkerSpec};
pub use session::{
    DispatchRecord, StageStatus, Strategy, TaskId, TaskManager, TaskRequest, TaskSnapshot,
    TaskState,
};
