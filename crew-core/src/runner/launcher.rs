//! Worker invocation specs and the command builders that realize them

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::agent::AgentDefinition;
use crate::config::WorkerConfig;
use crate::session::TaskId;

/// Everything needed to start one worker invocation
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub task_id: TaskId,
    /// Stage or invocation label, unique among the task's active workers
    pub stage: String,
    pub prompt: String,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    pub working_dir: PathBuf,
    /// Environment overrides for this invocation only
    pub env: BTreeMap<String, String>,
    /// Extra command-line arguments for this invocation only
    pub extra_args: Vec<String>,
}

impl WorkerSpec {
    /// Spec for running `agent` under the given stage label
    pub fn for_agent(
        task_id: TaskId,
        stage: impl Into<String>,
        agent: &AgentDefinition,
        prompt: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id,
            stage: stage.into(),
            prompt: prompt.into(),
            system_prompt: agent.system_prompt.clone(),
            allowed_tools: agent.allowed_tools.clone(),
            max_turns: agent.max_turns,
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            extra_args: Vec::new(),
        }
    }
}

/// Builds the OS command for a worker invocation
///
/// The runner owns stdio, process-group and reaping concerns; launchers only
/// decide program, arguments, directory and environment.
pub trait WorkerLauncher: Send + Sync {
    fn command(&self, spec: &WorkerSpec) -> Command;

    /// Program name, for error messages
    fn program(&self) -> String;
}

/// Launcher that runs Claude Code in print mode with stream-json output
#[derive(Debug, Clone, Default)]
pub struct ClaudeLauncher {
    config: WorkerConfig,
}

impl ClaudeLauncher {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }
}

impl WorkerLauncher for ClaudeLauncher {
    fn command(&self, spec: &WorkerSpec) -> Command {
        let mut cmd = Command::new(self.program());

        // Print mode with stream-json output (requires --verbose)
        cmd.arg("-p")
            .arg("--verbose")
            .arg("--output-format")
            .arg("stream-json");

        if !spec.system_prompt.is_empty() {
            cmd.arg("--append-system-prompt").arg(&spec.system_prompt);
        }

        if !spec.allowed_tools.is_empty() {
            cmd.arg("--allowedTools").arg(spec.allowed_tools.join(","));
        }

        cmd.arg("--max-turns").arg(spec.max_turns.to_string());

        if let Some(ref model) = self.config.model {
            cmd.arg("--model").arg(model);
        }
        if let Some(ref mode) = self.config.permission_mode {
            cmd.arg("--permission-mode").arg(mode);
        }

        cmd.args(&self.config.extra_args);
        cmd.args(&spec.extra_args);

        // The prompt comes last
        cmd.arg(&spec.prompt);

        cmd.current_dir(&spec.working_dir);
        cmd.envs(&self.config.env);
        cmd.envs(&spec.env);
        cmd.stdin(Stdio::null());

        cmd
    }

    fn program(&self) -> String {
        self.config
            .claude_path
            .clone()
            .unwrap_or_else(|| "claude".to_string())
    }
}
