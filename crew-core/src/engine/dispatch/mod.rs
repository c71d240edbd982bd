//! Coordinator dispatch: how a Team/Auto coordinator runs sub-invocations
//!
//! Two backends sit behind [`DispatchBackend`] and are chosen from
//! [`DispatchMode`]:
//!
//! - [`SpawnBackend`]: the coordinator's own worker spawns children; the
//!   engine reconstructs dispatches from the coordinator's tool chunks.
//! - [`RemoteBackend`]: the coordinator calls a local HTTP endpoint; each
//!   call becomes a separate worker via [`RunnerDispatcher`].

mod remote;
mod runner;
mod spawn;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DispatchMode;
use crate::error::DispatchError;
use crate::parser::StreamChunk;
use crate::runner::WorkerSpec;
use crate::session::DispatchRecord;

pub use remote::{DispatchServer, RemoteBackend};
pub use runner::{RolePolicy, RunnerDispatcher};
pub use spawn::SpawnBackend;

/// Environment variable carrying the dispatch endpoint URL to the coordinator
pub const DISPATCH_URL_ENV: &str = "CREW_DISPATCH_URL";

/// Environment variable carrying the task id to the coordinator
pub const TASK_ID_ENV: &str = "CREW_TASK_ID";

/// A coordinator's request to run a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub role: String,
    /// Instructions for the role
    pub task: String,
    /// Sender's task id; requests for another task are rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Ad hoc role prompt (Auto only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
}

impl DispatchRequest {
    pub fn new(role: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            task: task.into(),
            task_id: None,
            system_prompt: None,
            allowed_tools: None,
            max_turns: None,
        }
    }
}

/// Result returned synchronously to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub role: String,
    pub label: String,
    pub ok: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

impl From<&DispatchRecord> for DispatchResponse {
    fn from(record: &DispatchRecord) -> Self {
        Self {
            role: record.role.clone(),
            label: record.label.clone(),
            ok: record.ok,
            output: record.output.clone(),
            error: record.error.clone(),
            cost_usd: record.cost_usd,
            duration_ms: record.duration_ms,
        }
    }
}

/// Runs one role for a coordinator and returns its captured result
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse;
}

/// Progress a backend reports to the coordinator engine
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchNotice {
    Started { role: String, label: String },
    Completed(DispatchRecord),
}

/// Mechanism by which a coordinator's dispatches are realized
#[async_trait]
pub trait DispatchBackend: Send {
    fn mode(&self) -> DispatchMode;

    /// Prepare the coordinator invocation before it starts
    async fn attach(&mut self, spec: &mut WorkerSpec) -> Result<(), DispatchError>;

    /// Inspect one coordinator chunk
    fn observe(&mut self, chunk: &StreamChunk) -> Vec<DispatchNotice>;

    /// The coordinator has exited; release resources and flush what's pending
    async fn finish(&mut self) -> Vec<DispatchNotice>;
}

/// Hands out per-role invocation labels: `development#1`, `development#2`, …
#[derive(Debug, Default)]
pub(crate) struct LabelCounter {
    counts: Mutex<HashMap<String, u32>>,
}

impl LabelCounter {
    pub(crate) fn next(&self, role: &str) -> String {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(role.to_string()).or_insert(0);
        *count += 1;
        format!("{role}#{count}")
    }
}
