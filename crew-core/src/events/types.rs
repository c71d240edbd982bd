//! Event type definitions

use serde::{Deserialize, Serialize};

use crate::parser::StreamChunk;
use crate::session::{Strategy, TaskId};

/// Lifecycle and output notifications published during task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrewEvent {
    /// Task accepted and its engine started
    TaskStarted {
        task_id: TaskId,
        strategy: Strategy,
        task: String,
    },

    /// A stage or coordinator invocation started
    StageStarted { task_id: TaskId, stage: String },

    /// Decoded output from any worker belonging to the task
    AgentOutput {
        task_id: TaskId,
        stage: String,
        chunk: StreamChunk,
    },

    StageCompleted {
        task_id: TaskId,
        stage: String,
        cost_usd: f64,
        duration_ms: u64,
    },

    StageFailed {
        task_id: TaskId,
        stage: String,
        reason: String,
    },

    /// A coordinator asked for a sub-invocation
    DispatchStarted {
        task_id: TaskId,
        role: String,
        label: String,
    },

    DispatchCompleted {
        task_id: TaskId,
        role: String,
        label: String,
        ok: bool,
        cost_usd: f64,
        duration_ms: u64,
    },

    TaskCompleted {
        task_id: TaskId,
        cost_usd: f64,
        duration_ms: u64,
    },

    TaskFailed { task_id: TaskId, reason: String },

    TaskStopped { task_id: TaskId, reason: String },
}

impl CrewEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            CrewEvent::TaskStarted { task_id, .. }
            | CrewEvent::StageStarted { task_id, .. }
            | CrewEvent::AgentOutput { task_id, .. }
            | CrewEvent::StageCompleted { task_id, .. }
            | CrewEvent::StageFailed { task_id, .. }
            | CrewEvent::DispatchStarted { task_id, .. }
            | CrewEvent::DispatchCompleted { task_id, .. }
            | CrewEvent::TaskCompleted { task_id, .. }
            | CrewEvent::TaskFailed { task_id, .. }
            | CrewEvent::TaskStopped { task_id, .. } => task_id,
        }
    }

    /// Type tag as serialized
    pub fn type_name(&self) -> &'static str {
        match self {
            CrewEvent::TaskStarted { .. } => "task_started",
            CrewEvent::StageStarted { .. } => "stage_started",
            CrewEvent::AgentOutput { .. } => "agent_output",
            CrewEvent::StageCompleted { .. } => "stage_completed",
            CrewEvent::StageFailed { .. } => "stage_failed",
            CrewEvent::DispatchStarted { .. } => "dispatch_started",
            CrewEvent::DispatchCompleted { .. } => "dispatch_completed",
            CrewEvent::TaskCompleted { .. } => "task_completed",
            CrewEvent::TaskFailed { .. } => "task_failed",
            CrewEvent::TaskStopped { .. } => "task_stopped",
        }
    }

    /// Whether this event ends its task
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrewEvent::TaskCompleted { .. }
                | CrewEvent::TaskFailed { .. }
                | CrewEvent::TaskStopped { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = CrewEvent::StageStarted {
            task_id: TaskId::from("t1"),
            stage: "product".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stage_started");
        assert_eq!(json["type"], event.type_name());
        assert_eq!(json["task_id"], "t1");
    }

    #[test]
    fn agent_output_nests_chunk_kind() {
        let event = CrewEvent::AgentOutput {
            task_id: TaskId::from("t1"),
            stage: "dev".to_string(),
            chunk: StreamChunk::TextDelta {
                text: "hi".to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["chunk"]["kind"], "text_delta");

        let parsed: CrewEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn only_task_end_events_are_terminal() {
        let id = TaskId::from("t1");
        assert!(CrewEvent::TaskStopped {
            task_id: id.clone(),
            reason: "user".to_string()
        }
        .is_terminal());
        assert!(!CrewEvent::StageFailed {
            task_id: id,
            stage: "dev".to_string(),
            reason: "exit 1".to_string()
        }
        .is_terminal());
    }
}
