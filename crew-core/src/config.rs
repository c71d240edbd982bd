//! Orchestrator configuration
//!
//! Plain serde types; loading and layering live in crew-cli.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default cap on each prior stage's output inside a rendered prompt
pub const DEFAULT_HANDOFF_CHAR_CAP: usize = 8000;

/// How a Team coordinator's sub-invocations are realized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// The coordinator's own worker spawns children (Claude's Task tool);
    /// dispatches are reconstructed from its output stream.
    #[default]
    Spawn,
    /// The coordinator calls back into the orchestrator over a local HTTP
    /// endpoint and each child becomes a separate worker process.
    Remote,
}

/// Worker binary settings shared by every invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Path to claude binary (defaults to "claude")
    pub claude_path: Option<String>,
    /// Model override passed with --model
    pub model: Option<String>,
    /// Permission mode passed with --permission-mode
    pub permission_mode: Option<String>,
    /// Extra arguments appended before the prompt
    pub extra_args: Vec<String>,
    /// Environment overrides for every worker
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Tools the coordinator itself may use
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    /// Command line the coordinator runs to reach the remote dispatch endpoint
    pub dispatch_command: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            allowed_tools: vec!["Read".to_string(), "Glob".to_string(), "Grep".to_string()],
            max_turns: 50,
            dispatch_command: "crew dispatch".to_string(),
        }
    }
}

/// Defaults for roles a coordinator invents under the Auto strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdHocConfig {
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
}

impl Default for AdHocConfig {
    fn default() -> Self {
        Self {
            allowed_tools: ["Read", "Write", "Edit", "Bash", "Glob", "Grep"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_turns: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub worker: WorkerConfig,
    /// Time between the graceful termination signal and a forced kill
    pub grace_period_ms: u64,
    /// Deadline for any single worker invocation
    pub stage_timeout_secs: Option<u64>,
    /// Deadline for a whole task
    pub task_timeout_secs: Option<u64>,
    /// Simultaneously active dispatched workers per task
    pub max_parallel_workers: usize,
    /// Per-stage output cap in rendered prompts
    pub handoff_char_cap: usize,
    pub dispatch_mode: DispatchMode,
    pub coordinator: CoordinatorConfig,
    pub ad_hoc: AdHocConfig,
    /// Events kept in memory for replay
    pub event_history: usize,
    /// Finished tasks kept queryable by id
    pub task_history: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            grace_period_ms: 5000,
            stage_timeout_secs: None,
            task_timeout_secs: None,
            max_parallel_workers: 3,
            handoff_char_cap: DEFAULT_HANDOFF_CHAR_CAP,
            dispatch_mode: DispatchMode::default(),
            coordinator: CoordinatorConfig::default(),
            ad_hoc: AdHocConfig::default(),
            event_history: 10_000,
            task_history: 1_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.handoff_char_cap, 8000);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.max_parallel_workers, 3);
        assert_eq!(config.dispatch_mode, DispatchMode::Spawn);
        assert!(config.stage_timeout().is_none());
        assert_eq!(config.ad_hoc.max_turns, 30);
        assert_eq!(config.task_history, 1_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
grace_period_ms = 250
dispatch_mode = "remote"

[coordinator]
max_turns = 12
"#;
        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.grace_period_ms, 250);
        assert_eq!(config.dispatch_mode, DispatchMode::Remote);
        assert_eq!(config.coordinator.max_turns, 12);
        assert_eq!(config.coordinator.dispatch_command, "crew dispatch");
        assert_eq!(config.handoff_char_cap, DEFAULT_HANDOFF_CHAR_CAP);
    }

    #[test]
    fn worker_env_overrides_parse() {
        let toml_str = r#"
[worker]
claude_path = "/opt/claude"

[worker.env]
ANTHROPIC_LOG = "debug"
"#;
        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.worker.claude_path.as_deref(), Some("/opt/claude"));
        assert_eq!(
            config.worker.env.get("ANTHROPIC_LOG").map(String::as_str),
            Some("debug")
        );
    }
}
