//! TaskManager: submit, observe and stop tasks
//!
//! Each submitted task gets its own session, handoff context and stop
//! switch, and runs on its own tokio task. Callers only ever see
//! [`TaskSnapshot`]s.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use crate::agent::SharedRegistry;
use crate::config::OrchestratorConfig;
use crate::engine::{EngineContext, TaskRun, run_task};
use crate::error::TaskError;
use crate::events::EventBus;
use crate::handoff::HandoffContext;
use crate::runner::{ProcessRunner, RunnerConfig, WorkerLauncher};

use super::control::TaskControl;
use super::state::{TaskSession, TaskSnapshot};
use super::types::{Strategy, TaskId};

/// What a caller asks the orchestrator to do
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub task: String,
    pub strategy: Strategy,
    /// Stage order for Pipeline; ignored by Team and Auto
    pub stages: Vec<String>,
    /// Defaults to the process's current directory
    pub working_dir: Option<PathBuf>,
}

impl TaskRequest {
    pub fn pipeline<I, S>(task: impl Into<String>, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task: task.into(),
            strategy: Strategy::Pipeline,
            stages: stages.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    pub fn team(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            strategy: Strategy::Team,
            stages: Vec::new(),
            working_dir: None,
        }
    }

    pub fn auto(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            strategy: Strategy::Auto,
            stages: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }

    fn validate(&self) -> Result<(), TaskError> {
        if self.task.trim().is_empty() {
            return Err(TaskError::InvalidRequest("task text is empty".to_string()));
        }
        if self.strategy == Strategy::Pipeline && self.stages.is_empty() {
            return Err(TaskError::InvalidRequest(
                "pipeline needs at least one stage".to_string(),
            ));
        }
        if let Some(blank) = self.stages.iter().find(|s| s.trim().is_empty()) {
            return Err(TaskError::InvalidRequest(format!(
                "invalid stage name {blank:?}"
            )));
        }
        // Stage status and handoff output are both keyed by name
        let mut seen = HashSet::new();
        if let Some(duplicate) = self.stages.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(TaskError::InvalidRequest(format!(
                "stage {duplicate:?} listed more than once"
            )));
        }
        Ok(())
    }
}

struct TaskEntry {
    snapshots: watch::Receiver<TaskSnapshot>,
    control: Arc<TaskControl>,
}

/// Entry point for submitting and controlling tasks
pub struct TaskManager {
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    registry: SharedRegistry,
    runner: Arc<ProcessRunner>,
    bus: Arc<dyn EventBus>,
    config: Arc<OrchestratorConfig>,
}

impl TaskManager {
    pub fn new(
        registry: SharedRegistry,
        launcher: Arc<dyn WorkerLauncher>,
        bus: Arc<dyn EventBus>,
        config: OrchestratorConfig,
    ) -> Self {
        let runner = ProcessRunner::new(launcher, RunnerConfig::from(&config));
        Self {
            tasks: RwLock::new(HashMap::new()),
            registry,
            runner: Arc::new(runner),
            bus,
            config: Arc::new(config),
        }
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn runner(&self) -> &Arc<ProcessRunner> {
        &self.runner
    }

    /// Create a task and start running it in the background
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId, TaskError> {
        request.validate()?;

        let working_dir = match request.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(|e| {
                TaskError::InvalidRequest(format!("no working directory: {e}"))
            })?,
        };

        let id = TaskId::new();
        let session = TaskSession::new(
            id.clone(),
            request.strategy,
            request.task.as_str(),
            &request.stages,
            working_dir.as_path(),
        );
        let handoff = HandoffContext::new(request.task, request.stages, working_dir)
            .with_char_cap(self.config.handoff_char_cap);
        let control = Arc::new(TaskControl::new());
        let (snapshots_tx, snapshots_rx) = watch::channel(session.snapshot());

        let ctx = EngineContext {
            registry: self.registry.current(),
            runner: Arc::clone(&self.runner),
            bus: Arc::clone(&self.bus),
            control: Arc::clone(&control),
            config: Arc::clone(&self.config),
        };
        let run = TaskRun::new(session, handoff, ctx, snapshots_tx);

        {
            let mut tasks = self.tasks.write().await;
            evict_finished(&mut tasks, self.config.task_history);
            tasks.insert(
                id.clone(),
                TaskEntry {
                    snapshots: snapshots_rx.clone(),
                    control: Arc::clone(&control),
                },
            );
        }
        info!(task_id = %id, strategy = %request.strategy, "Task submitted");

        tokio::spawn(run_task(run));

        if let Some(limit) = self.config.task_timeout() {
            let runner = Arc::clone(&self.runner);
            let task_id = id.clone();
            let mut snapshots = snapshots_rx;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        let reason = format!("task timed out after {}s", limit.as_secs());
                        if control.request_stop(reason) {
                            warn!(task_id = %task_id, "Task deadline exceeded, stopping");
                            runner.stop_all(&task_id).await;
                        }
                    }
                    // The returned guard is not Send; drop it inside the branch
                    _ = async { let _ = snapshots.wait_for(TaskSnapshot::is_terminal).await; } => {}
                }
            });
        }

        Ok(id)
    }

    async fn entry(
        &self,
        id: &TaskId,
    ) -> Result<(watch::Receiver<TaskSnapshot>, Arc<TaskControl>), TaskError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        Ok((entry.snapshots.clone(), Arc::clone(&entry.control)))
    }

    /// Current snapshot of a task
    pub async fn status(&self, id: &TaskId) -> Result<TaskSnapshot, TaskError> {
        let (snapshots, control) = self.entry(id).await?;
        let mut snapshot = snapshots.borrow().clone();
        if control.is_stop_requested() {
            snapshot.cancel_requested = true;
        }
        Ok(snapshot)
    }

    /// Stop a task and wait for its teardown
    ///
    /// Returns `true` only when this call initiated the stop of a task that
    /// had not yet ended; stopping a finished or already-stopping task is a
    /// no-op returning `false`.
    pub async fn stop(&self, id: &TaskId) -> Result<bool, TaskError> {
        let (mut snapshots, control) = self.entry(id).await?;
        if snapshots.borrow().is_terminal() {
            return Ok(false);
        }
        if !control.request_stop("stopped by request") {
            return Ok(false);
        }

        info!(task_id = %id, "Stopping task");
        self.runner.stop_all(id).await;
        // An engine that exits without a terminal snapshot has already logged why
        let _ = snapshots.wait_for(TaskSnapshot::is_terminal).await;
        Ok(true)
    }

    /// Wait until a task reaches a terminal state
    pub async fn wait(&self, id: &TaskId) -> Result<TaskSnapshot, TaskError> {
        let (mut snapshots, _) = self.entry(id).await?;
        if let Ok(snapshot) = snapshots.wait_for(TaskSnapshot::is_terminal).await {
            return Ok(snapshot.clone());
        }
        Ok(snapshots.borrow().clone())
    }

    /// Receiver that sees every snapshot update for a task
    pub async fn watch(&self, id: &TaskId) -> Result<watch::Receiver<TaskSnapshot>, TaskError> {
        Ok(self.entry(id).await?.0)
    }

    /// All known tasks, oldest first
    pub async fn list(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.read().await;
        let mut snapshots: Vec<_> = tasks
            .values()
            .map(|entry| entry.snapshots.borrow().clone())
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }
}

/// Drop the oldest finished tasks so at most `keep` remain; live tasks stay
fn evict_finished(tasks: &mut HashMap<TaskId, TaskEntry>, keep: usize) {
    let mut finished: Vec<_> = tasks
        .iter()
        .filter_map(|(id, entry)| {
            let snapshot = entry.snapshots.borrow();
            snapshot
                .is_terminal()
                .then(|| (snapshot.created_at, id.clone()))
        })
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        tasks.remove(&id);
    }
    debug!(evicted = excess, "Evicted finished tasks");
}
