//! Shared fixtures: a launcher that runs shell scripts in place of workers

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crew_core::{
    AgentDefinition, AgentRegistry, MemoryEventBus, OrchestratorConfig, SharedRegistry,
    TaskManager, WorkerLauncher, WorkerSpec,
};
use tokio::process::Command;

/// Runs a canned `/bin/sh` script per stage and records every spec it saw
///
/// Scripts are keyed by stage name; dispatch labels such as `review#2` fall
/// back to the role's script.
#[derive(Default)]
pub struct ScriptLauncher {
    scripts: Mutex<HashMap<String, String>>,
    specs: Mutex<Vec<WorkerSpec>>,
}

impl ScriptLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, stage: &str, script: impl Into<String>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(stage.to_string(), script.into());
    }

    pub fn specs(&self) -> Vec<WorkerSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn spec_for(&self, stage: &str) -> Option<WorkerSpec> {
        self.specs().into_iter().find(|s| s.stage == stage)
    }

    pub fn launched(&self) -> Vec<String> {
        self.specs().into_iter().map(|s| s.stage).collect()
    }

    /// Poll until a worker for `stage` has been launched
    pub async fn wait_for_launch(&self, stage: &str) -> WorkerSpec {
        for _ in 0..500 {
            if let Some(spec) = self.spec_for(stage) {
                return spec;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("worker for {stage} never launched");
    }
}

impl WorkerLauncher for ScriptLauncher {
    fn command(&self, spec: &WorkerSpec) -> Command {
        self.specs.lock().unwrap().push(spec.clone());
        let scripts = self.scripts.lock().unwrap();
        let role = spec.stage.split('#').next().unwrap_or(&spec.stage);
        let script = scripts
            .get(&spec.stage)
            .or_else(|| scripts.get(role))
            .cloned()
            .unwrap_or_else(|| "exit 3".to_string());

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(script)
            .current_dir(&spec.working_dir)
            .envs(&spec.env);
        cmd
    }

    fn program(&self) -> String {
        "/bin/sh".to_string()
    }
}

/// Assistant text line in print-mode stream-json
pub fn text_line(text: &str) -> String {
    format!(
        r#"echo '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"{text}"}}]}}}}'"#
    )
}

/// Successful final result line
pub fn result_line(cost_usd: f64, result: &str) -> String {
    format!(
        r#"echo '{{"type":"result","subtype":"success","is_error":false,"duration_ms":100,"total_cost_usd":{cost_usd},"num_turns":1,"result":"{result}"}}'"#
    )
}

/// Script that says `text` and finishes with it as the result
pub fn succeed(text: &str, cost_usd: f64) -> String {
    format!("{}\n{}", text_line(text), result_line(cost_usd, text))
}

pub fn registry(names: &[&str]) -> SharedRegistry {
    let definitions = names.iter().map(|name| {
        AgentDefinition::new(*name, format!("You are the {name} agent."), 10)
            .with_description(format!("Handles {name} work"))
    });
    SharedRegistry::new(AgentRegistry::from_definitions(definitions).unwrap())
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        grace_period_ms: 300,
        ..OrchestratorConfig::default()
    }
}

pub fn manager(
    launcher: Arc<ScriptLauncher>,
    names: &[&str],
    config: OrchestratorConfig,
) -> (TaskManager, Arc<MemoryEventBus>) {
    let bus = Arc::new(MemoryEventBus::new(1000));
    let manager = TaskManager::new(registry(names), launcher, bus.clone(), config);
    (manager, bus)
}
