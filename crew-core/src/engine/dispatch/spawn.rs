//! In-process dispatch: the coordinator's worker spawns its own sub-agents
//!
//! Sub-agents are handed to the coordinator as `--agents` JSON and invoked
//! through its `Task` tool. The backend never starts processes itself; it
//! pairs each `Task` tool start with its input and result to rebuild the
//! dispatches.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::agent::AgentRegistry;
use crate::config::DispatchMode;
use crate::error::DispatchError;
use crate::parser::StreamChunk;
use crate::runner::WorkerSpec;
use crate::session::{DispatchRecord, UNATTRIBUTED_ROLE};

use super::{DispatchBackend, DispatchNotice, LabelCounter};

/// Tool names the worker uses for sub-agent invocation
const SPAWN_TOOLS: &[&str] = &["Task", "Agent"];

const INSTRUCTIONS: &str = "\n\n## Dispatching agents\n\n\
    Delegate work with the Task tool, setting subagent_type to the agent name and putting \
    the instructions in prompt. A failed sub-agent reports the reason; decide whether to \
    retry or continue. Independent agents may be launched together.";

#[derive(Debug, Deserialize)]
struct TaskToolInput {
    #[serde(default)]
    subagent_type: Option<String>,
}

#[derive(Debug)]
struct PendingSpawn {
    id: String,
    input: String,
    /// Set once the input has been decoded
    attribution: Option<(String, String)>,
    started: Instant,
}

pub struct SpawnBackend {
    registry: Arc<AgentRegistry>,
    labels: LabelCounter,
    pending: Vec<PendingSpawn>,
    /// Id of the most recent spawn, for fragments that carry no id
    latest: Option<String>,
}

impl SpawnBackend {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            labels: LabelCounter::default(),
            pending: Vec::new(),
            latest: None,
        }
    }

    /// Sub-agent definitions in the shape the worker's `--agents` flag takes
    fn agents_json(&self) -> Value {
        let agents: Map<String, Value> = self
            .registry
            .all()
            .into_iter()
            .map(|(name, agent)| {
                let description = if agent.description.is_empty() {
                    format!("The {name} agent")
                } else {
                    agent.description.clone()
                };
                let mut entry = json!({
                    "description": description,
                    "prompt": agent.system_prompt,
                });
                if !agent.allowed_tools.is_empty() {
                    entry["tools"] = json!(agent.allowed_tools);
                }
                (name, entry)
            })
            .collect();
        Value::Object(agents)
    }

    fn attribute(&self, input: &TaskToolInput) -> String {
        match input.subagent_type.as_deref() {
            Some(role) if self.registry.contains(role) => role.to_string(),
            _ => UNATTRIBUTED_ROLE.to_string(),
        }
    }

    /// Decode the accumulated input once it is complete JSON
    fn try_attribute(&mut self, index: usize) -> Option<DispatchNotice> {
        let input: TaskToolInput = serde_json::from_str(&self.pending[index].input).ok()?;
        let role = self.attribute(&input);
        let label = self.labels.next(&role);
        self.pending[index].attribution = Some((role.clone(), label.clone()));
        Some(DispatchNotice::Started { role, label })
    }

    fn complete(
        &mut self,
        index: usize,
        ok: bool,
        output: String,
        error: Option<String>,
    ) -> Vec<DispatchNotice> {
        let mut notices = Vec::new();
        let pending = self.pending.remove(index);
        let (role, label) = match pending.attribution {
            Some(attribution) => attribution,
            None => {
                let role = UNATTRIBUTED_ROLE.to_string();
                let label = self.labels.next(&role);
                notices.push(DispatchNotice::Started {
                    role: role.clone(),
                    label: label.clone(),
                });
                (role, label)
            }
        };
        notices.push(DispatchNotice::Completed(DispatchRecord {
            role,
            label,
            output,
            ok,
            error,
            // Included in the coordinator's own final result
            cost_usd: 0.0,
            duration_ms: pending.started.elapsed().as_millis() as u64,
            ad_hoc: false,
        }));
        notices
    }
}

#[async_trait]
impl DispatchBackend for SpawnBackend {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Spawn
    }

    async fn attach(&mut self, spec: &mut WorkerSpec) -> Result<(), DispatchError> {
        if !spec.allowed_tools.iter().any(|tool| tool == "Task") {
            spec.allowed_tools.push("Task".to_string());
        }
        spec.extra_args.push("--agents".to_string());
        spec.extra_args.push(self.agents_json().to_string());
        spec.system_prompt.push_str(INSTRUCTIONS);
        Ok(())
    }

    fn observe(&mut self, chunk: &StreamChunk) -> Vec<DispatchNotice> {
        match chunk {
            StreamChunk::ToolStart { id, name } if SPAWN_TOOLS.contains(&name.as_str()) => {
                if !self.pending.iter().any(|p| &p.id == id) {
                    self.pending.push(PendingSpawn {
                        id: id.clone(),
                        input: String::new(),
                        attribution: None,
                        started: Instant::now(),
                    });
                }
                self.latest = Some(id.clone());
                Vec::new()
            }
            StreamChunk::ToolInputFragment { id, fragment } => {
                let target = if id.is_empty() {
                    self.latest.as_deref()
                } else {
                    Some(id.as_str())
                };
                let Some(index) = target.and_then(|target| {
                    self.pending.iter().position(|p| p.id == target)
                }) else {
                    return Vec::new();
                };
                if self.pending[index].attribution.is_some() {
                    return Vec::new();
                }
                self.pending[index].input.push_str(fragment);
                self.try_attribute(index).into_iter().collect()
            }
            StreamChunk::ToolResult {
                id,
                output,
                is_error,
            } => {
                let Some(index) = self.pending.iter().position(|p| &p.id == id) else {
                    return Vec::new();
                };
                let error = is_error.then(|| output.clone());
                self.complete(index, !is_error, output.clone(), error)
            }
            _ => Vec::new(),
        }
    }

    async fn finish(&mut self) -> Vec<DispatchNotice> {
        let mut notices = Vec::new();
        while !self.pending.is_empty() {
            notices.extend(self.complete(
                0,
                false,
                String::new(),
                Some("coordinator exited before the sub-agent returned".to_string()),
            ));
        }
        notices
    }
}
