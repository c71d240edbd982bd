//! Task identity and lifecycle enums

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new task ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for terminal output
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Execution strategy for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Fixed, caller-supplied stage sequence
    Pipeline,
    /// Coordinator chooses among registered roles
    Team,
    /// Coordinator may invent roles
    Auto,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipeline => "pipeline",
            Self::Team => "team",
            Self::Auto => "auto",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pipeline" => Some(Self::Pipeline),
            "team" => Some(Self::Team),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle state
///
/// `Pending → Running → {Completed | Failed | Stopped}`; terminal states are
/// never left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed { reason: String },
    Stopped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed { .. } | TaskState::Stopped
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed { .. } => "failed",
            TaskState::Stopped => "stopped",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Running => 1,
            TaskState::Completed | TaskState::Failed { .. } | TaskState::Stopped => 2,
        }
    }

    /// Whether `next` is reachable from `self` without revisiting a state
    ///
    /// A task that never ran can only end stopped.
    pub fn can_transition_to(&self, next: &TaskState) -> bool {
        match (self, next) {
            (TaskState::Pending, TaskState::Running | TaskState::Stopped) => true,
            (TaskState::Pending, _) => false,
            _ => !self.is_terminal() && next.rank() > self.rank(),
        }
    }
}

/// Status of one stage or one coordinator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed { cost_usd: f64, duration_ms: u64 },
    Failed { reason: String },
    Stopped { reason: String },
}

impl StageStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed { .. } => "completed",
            StageStatus::Failed { .. } => "failed",
            StageStatus::Stopped { .. } => "stopped",
        }
    }
}

/// Role bucket for sub-invocations that can't be tied to a registered role
pub const UNATTRIBUTED_ROLE: &str = "unattributed";

/// One coordinator-initiated sub-invocation, attributed to a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Role the output is attributed to
    pub role: String,
    /// Unique label of the invocation within its task
    pub label: String,
    pub output: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Zero when the sub-invocation never reported a final result
    pub cost_usd: f64,
    pub duration_ms: u64,
    /// Role was invented by the coordinator rather than taken from the registry
    #[serde(default)]
    pub ad_hoc: bool,
}
