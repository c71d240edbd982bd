use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crew_core::{AdHocConfig, CoordinatorConfig, OrchestratorConfig, WorkerConfig};
use directories::ProjectDirs;
use thiserror::Error;
use tracing::debug;

use super::types::{
    AgentConfig, CrewConfig, DEFAULT_AGENT_MAX_TURNS, PipelineConfig, RawAdHocConfig,
    RawAgentConfig, RawCoordinatorConfig, RawCrewConfig, RawPipelineConfig, RawWorkerConfig,
    default_agents,
};

/// Environment variable overriding the project config directory
pub const PROJECT_CONFIG_DIR_ENV: &str = "CREW_PROJECT_CONFIG_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Agent {agent} defined twice in {path}")]
    DuplicateAgent { agent: String, path: PathBuf },

    #[error("Agent {agent} needs system_prompt or system_prompt_file")]
    MissingPrompt { agent: String },

    #[error("Failed to read prompt file {path} for agent {agent}: {source}")]
    PromptFile {
        agent: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<CrewConfig, ConfigError> {
        Self::load_from(Self::user_config_path().as_deref(), &Self::project_config_path())
    }

    /// Load and merge the given layers; missing files are skipped
    pub fn load_from(user: Option<&Path>, project: &Path) -> Result<CrewConfig, ConfigError> {
        let mut raw = RawCrewConfig::default();

        // Layer 1: User config
        if let Some(user_path) = user
            && let Some(user_config) = Self::read_layer(user_path)?
        {
            raw = Self::merge_raw(raw, user_config);
        }

        // Layer 2: Project config
        if let Some(project_config) = Self::read_layer(project)? {
            raw = Self::merge_raw(raw, project_config);
        }

        // Convert to final config with defaults applied
        Ok(Self::finalize(raw))
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "crew").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with CREW_PROJECT_CONFIG_DIR (useful for isolated tests)
    pub fn project_config_path() -> PathBuf {
        match std::env::var(PROJECT_CONFIG_DIR_ENV) {
            Ok(dir) => PathBuf::from(dir).join("config.toml"),
            Err(_) => PathBuf::from(".crew/config.toml"),
        }
    }

    /// Parse one file, resolving agent prompt files against its directory
    fn read_layer(path: &Path) -> Result<Option<RawCrewConfig>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        debug!(path = %path.display(), "Loading config layer");

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut layer: RawCrewConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut seen = HashSet::new();
        for agent in &mut layer.agents {
            if !seen.insert(agent.name.clone()) {
                return Err(ConfigError::DuplicateAgent {
                    agent: agent.name.clone(),
                    path: path.to_path_buf(),
                });
            }
            Self::resolve_prompt(agent, base)?;
        }
        Ok(Some(layer))
    }

    fn resolve_prompt(agent: &mut RawAgentConfig, base: &Path) -> Result<(), ConfigError> {
        if let Some(file) = agent.system_prompt_file.take() {
            let path = base.join(file);
            let prompt =
                std::fs::read_to_string(&path).map_err(|source| ConfigError::PromptFile {
                    agent: agent.name.clone(),
                    path: path.clone(),
                    source,
                })?;
            agent.system_prompt = Some(prompt.trim_end().to_string());
        }
        if agent.system_prompt.is_none() {
            return Err(ConfigError::MissingPrompt {
                agent: agent.name.clone(),
            });
        }
        Ok(())
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawCrewConfig, overlay: RawCrewConfig) -> RawCrewConfig {
        RawCrewConfig {
            grace_period_ms: overlay.grace_period_ms.or(base.grace_period_ms),
            stage_timeout_secs: overlay.stage_timeout_secs.or(base.stage_timeout_secs),
            task_timeout_secs: overlay.task_timeout_secs.or(base.task_timeout_secs),
            max_parallel_workers: overlay.max_parallel_workers.or(base.max_parallel_workers),
            handoff_char_cap: overlay.handoff_char_cap.or(base.handoff_char_cap),
            dispatch_mode: overlay.dispatch_mode.or(base.dispatch_mode),
            event_history: overlay.event_history.or(base.event_history),
            task_history: overlay.task_history.or(base.task_history),
            worker: RawWorkerConfig {
                claude_path: overlay.worker.claude_path.or(base.worker.claude_path),
                model: overlay.worker.model.or(base.worker.model),
                permission_mode: overlay
                    .worker
                    .permission_mode
                    .or(base.worker.permission_mode),
                extra_args: overlay.worker.extra_args.or(base.worker.extra_args),
                env: match (base.worker.env, overlay.worker.env) {
                    (Some(mut env), Some(overlay_env)) => {
                        env.extend(overlay_env);
                        Some(env)
                    }
                    (base_env, overlay_env) => overlay_env.or(base_env),
                },
            },
            coordinator: RawCoordinatorConfig {
                allowed_tools: overlay
                    .coordinator
                    .allowed_tools
                    .or(base.coordinator.allowed_tools),
                max_turns: overlay.coordinator.max_turns.or(base.coordinator.max_turns),
                dispatch_command: overlay
                    .coordinator
                    .dispatch_command
                    .or(base.coordinator.dispatch_command),
            },
            ad_hoc: RawAdHocConfig {
                allowed_tools: overlay.ad_hoc.allowed_tools.or(base.ad_hoc.allowed_tools),
                max_turns: overlay.ad_hoc.max_turns.or(base.ad_hoc.max_turns),
            },
            pipeline: RawPipelineConfig {
                stages: overlay.pipeline.stages.or(base.pipeline.stages),
            },
            agents: Self::merge_agents(base.agents, overlay.agents),
        }
    }

    /// Overlay agents replace base agents of the same name, in place
    fn merge_agents(
        base: Vec<RawAgentConfig>,
        overlay: Vec<RawAgentConfig>,
    ) -> Vec<RawAgentConfig> {
        let mut merged = base;
        for agent in overlay {
            match merged.iter_mut().find(|existing| existing.name == agent.name) {
                Some(existing) => *existing = agent,
                None => merged.push(agent),
            }
        }
        merged
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawCrewConfig) -> CrewConfig {
        let defaults = OrchestratorConfig::default();
        let coordinator_defaults = CoordinatorConfig::default();
        let ad_hoc_defaults = AdHocConfig::default();

        let orchestrator = OrchestratorConfig {
            worker: WorkerConfig {
                claude_path: raw.worker.claude_path,
                model: raw.worker.model,
                permission_mode: raw.worker.permission_mode,
                extra_args: raw.worker.extra_args.unwrap_or_default(),
                env: raw.worker.env.unwrap_or_default(),
            },
            grace_period_ms: raw.grace_period_ms.unwrap_or(defaults.grace_period_ms),
            stage_timeout_secs: raw.stage_timeout_secs,
            task_timeout_secs: raw.task_timeout_secs,
            max_parallel_workers: raw
                .max_parallel_workers
                .unwrap_or(defaults.max_parallel_workers),
            handoff_char_cap: raw.handoff_char_cap.unwrap_or(defaults.handoff_char_cap),
            dispatch_mode: raw.dispatch_mode.unwrap_or(defaults.dispatch_mode),
            coordinator: CoordinatorConfig {
                allowed_tools: raw
                    .coordinator
                    .allowed_tools
                    .unwrap_or(coordinator_defaults.allowed_tools),
                max_turns: raw
                    .coordinator
                    .max_turns
                    .unwrap_or(coordinator_defaults.max_turns),
                dispatch_command: raw
                    .coordinator
                    .dispatch_command
                    .unwrap_or(coordinator_defaults.dispatch_command),
            },
            ad_hoc: AdHocConfig {
                allowed_tools: raw
                    .ad_hoc
                    .allowed_tools
                    .unwrap_or(ad_hoc_defaults.allowed_tools),
                max_turns: raw.ad_hoc.max_turns.unwrap_or(ad_hoc_defaults.max_turns),
            },
            event_history: raw.event_history.unwrap_or(defaults.event_history),
            task_history: raw.task_history.unwrap_or(defaults.task_history),
        };

        let agents = if raw.agents.is_empty() {
            default_agents()
        } else {
            raw.agents
                .into_iter()
                .map(|agent| AgentConfig {
                    name: agent.name,
                    description: agent.description.unwrap_or_default(),
                    system_prompt: agent.system_prompt.unwrap_or_default(),
                    tools: agent.tools.unwrap_or_default(),
                    max_turns: agent.max_turns.unwrap_or(DEFAULT_AGENT_MAX_TURNS),
                })
                .collect()
        };

        CrewConfig {
            orchestrator,
            pipeline: raw
                .pipeline
                .stages
                .map(|stages| PipelineConfig { stages })
                .unwrap_or_default(),
            agents,
        }
    }
}
