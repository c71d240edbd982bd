use std::collections::BTreeMap;
use std::path::PathBuf;

use crew_core::{AgentDefinition, AgentRegistry, DispatchMode, OrchestratorConfig, RegistryError};
use serde::{Deserialize, Serialize};

/// Turn budget for agents that don't set one
pub const DEFAULT_AGENT_MAX_TURNS: u32 = 30;

/// Configuration as stored in TOML files (with optional fields for merging)
///
/// Orchestrator settings sit at the top level; workers, coordinators, ad hoc
/// roles, the default pipeline and agent definitions get their own tables.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCrewConfig {
    pub grace_period_ms: Option<u64>,
    pub stage_timeout_secs: Option<u64>,
    pub task_timeout_secs: Option<u64>,
    pub max_parallel_workers: Option<usize>,
    pub handoff_char_cap: Option<usize>,
    pub dispatch_mode: Option<DispatchMode>,
    pub event_history: Option<usize>,
    pub task_history: Option<usize>,

    #[serde(default)]
    pub worker: RawWorkerConfig,

    #[serde(default)]
    pub coordinator: RawCoordinatorConfig,

    #[serde(default)]
    pub ad_hoc: RawAdHocConfig,

    #[serde(default)]
    pub pipeline: RawPipelineConfig,

    #[serde(default)]
    pub agents: Vec<RawAgentConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawWorkerConfig {
    pub claude_path: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub extra_args: Option<Vec<String>>,
    pub env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCoordinatorConfig {
    pub allowed_tools: Option<Vec<String>>,
    pub max_turns: Option<u32>,
    pub dispatch_command: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawAdHocConfig {
    pub allowed_tools: Option<Vec<String>>,
    pub max_turns: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPipelineConfig {
    /// Stage order used when `crew run` gets no --stages
    pub stages: Option<Vec<String>>,
}

/// One `[[agents]]` table
#[derive(Debug, Clone, Deserialize)]
pub struct RawAgentConfig {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    /// Path to a prompt file, relative to the config file declaring it
    pub system_prompt_file: Option<PathBuf>,
    pub tools: Option<Vec<String>>,
    pub max_turns: Option<u32>,
}

/// Final configuration with defaults applied
///
/// Serializes back into the file layout, so `crew config show` output can be
/// pasted into a config file.
#[derive(Debug, Clone, Serialize, Default)]
pub struct CrewConfig {
    #[serde(flatten)]
    pub orchestrator: OrchestratorConfig,

    pub pipeline: PipelineConfig,

    pub agents: Vec<AgentConfig>,
}

impl CrewConfig {
    /// Build the agent registry from the configured definitions
    pub fn registry(&self) -> Result<AgentRegistry, RegistryError> {
        AgentRegistry::from_definitions(self.agents.iter().map(AgentConfig::to_definition))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub stages: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: ["product", "development", "testing"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// A fully resolved agent definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    pub max_turns: u32,
}

impl AgentConfig {
    pub fn to_definition(&self) -> AgentDefinition {
        AgentDefinition::new(&self.name, &self.system_prompt, self.max_turns)
            .with_description(&self.description)
            .with_tools(self.tools.iter().cloned())
    }
}

/// Roles available when no `[[agents]]` are configured anywhere
pub fn default_agents() -> Vec<AgentConfig> {
    let agent = |name: &str, description: &str, prompt: &str, tools: &[&str], max_turns| {
        AgentConfig {
            name: name.to_string(),
            description: description.to_string(),
            system_prompt: prompt.to_string(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
            max_turns,
        }
    };
    vec![
        agent(
            "product",
            "Turns a request into a short, testable brief",
            "You are a product manager. Write a concise brief with acceptance criteria. \
             Do not write code.",
            &["Read", "Glob", "Grep"],
            10,
        ),
        agent(
            "development",
            "Implements the brief in the working directory",
            "You are a software engineer. Implement the brief with small, focused changes \
             and report what you changed.",
            &["Read", "Write", "Edit", "Bash", "Glob", "Grep"],
            40,
        ),
        agent(
            "testing",
            "Writes and runs tests for the change",
            "You are a test engineer. Add tests for the change, run them, and report the \
             results.",
            &["Read", "Write", "Edit", "Bash", "Glob", "Grep"],
            30,
        ),
        agent(
            "review",
            "Reviews the change for defects",
            "You are a code reviewer. Read the change and list concrete defects, or \
             approve it.",
            &["Read", "Glob", "Grep"],
            15,
        ),
    ]
}
