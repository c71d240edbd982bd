//! Orchestration engines
//!
//! An [`Engine`] drives the [`ProcessRunner`] for one task according to its
//! [`Strategy`]:
//!
//! - [`PipelineEngine`] runs a fixed stage list strictly in order.
//! - [`CoordinatorEngine`] runs one coordinating worker that dispatches
//!   registered roles (Team) or roles it invents (Auto).
//!
//! [`run_task`] wraps an engine with the task lifecycle: it publishes the
//! start and terminal events, reaps stray workers and seals the outcome.

mod coordinator;
pub mod dispatch;
mod pipeline;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::agent::AgentRegistry;
use crate::config::OrchestratorConfig;
use crate::events::{CrewEvent, EventBus};
use crate::handoff::HandoffContext;
use crate::runner::ProcessRunner;
use crate::session::{Strategy, TaskControl, TaskId, TaskSession, TaskSnapshot, TaskState};

pub use coordinator::CoordinatorEngine;
pub use pipeline::PipelineEngine;
pub use worker::{StageOutcome, StageReport};

/// Terminal result an engine reports for its task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    Stopped,
}

/// Shared services an engine drives
#[derive(Clone)]
pub struct EngineContext {
    /// Registry snapshot taken when the task was submitted
    pub registry: Arc<AgentRegistry>,
    pub runner: Arc<ProcessRunner>,
    pub bus: Arc<dyn EventBus>,
    pub control: Arc<TaskControl>,
    pub config: Arc<OrchestratorConfig>,
}

struct SessionCell {
    session: Mutex<TaskSession>,
    snapshots: watch::Sender<TaskSnapshot>,
}

/// Handle to one executing task, shared by its engine and dispatchers
///
/// The session and handoff context belong to this task alone; every
/// session mutation goes through [`TaskRun::update_session`], which
/// republishes the snapshot seen by status queries.
#[derive(Clone)]
pub struct TaskRun {
    task_id: TaskId,
    strategy: Strategy,
    working_dir: PathBuf,
    pub ctx: EngineContext,
    session: Arc<SessionCell>,
    handoff: Arc<Mutex<HandoffContext>>,
}

impl TaskRun {
    pub fn new(
        session: TaskSession,
        handoff: HandoffContext,
        ctx: EngineContext,
        snapshots: watch::Sender<TaskSnapshot>,
    ) -> Self {
        Self {
            task_id: session.id().clone(),
            strategy: session.strategy(),
            working_dir: handoff.working_dir().to_path_buf(),
            ctx,
            session: Arc::new(SessionCell {
                session: Mutex::new(session),
                snapshots,
            }),
            handoff: Arc::new(Mutex::new(handoff)),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn lock_session(&self) -> MutexGuard<'_, TaskSession> {
        self.session
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the session and publish the resulting snapshot
    pub fn update_session<R>(&self, f: impl FnOnce(&mut TaskSession) -> R) -> R {
        let mut session = self.lock_session();
        let result = f(&mut session);
        if self.ctx.control.is_stop_requested() {
            session.mark_cancel_requested();
        }
        self.session.snapshots.send_replace(session.snapshot());
        result
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.lock_session().snapshot()
    }

    pub fn with_handoff<R>(&self, f: impl FnOnce(&mut HandoffContext) -> R) -> R {
        let mut handoff = self.handoff.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut handoff)
    }

    pub fn publish(&self, event: CrewEvent) {
        self.ctx.bus.publish(event);
    }
}

/// One execution strategy
#[async_trait]
pub trait Engine: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Drive the task until it completes, fails or is stopped
    async fn execute(&self, run: &TaskRun) -> Outcome;
}

/// Engine implementing `strategy`
pub fn engine_for(strategy: Strategy) -> Box<dyn Engine> {
    match strategy {
        Strategy::Pipeline => Box::new(PipelineEngine),
        Strategy::Team => Box::new(CoordinatorEngine::team()),
        Strategy::Auto => Box::new(CoordinatorEngine::auto()),
    }
}

/// Run a submitted task to a terminal state
#[instrument(skip_all, fields(task_id = %run.task_id(), strategy = %run.strategy()))]
pub async fn run_task(run: TaskRun) -> TaskSnapshot {
    let outcome = if run.ctx.control.is_stop_requested() {
        Outcome::Stopped
    } else {
        if let Err(e) = run.update_session(|s| s.transition(TaskState::Running)) {
            warn!(error = %e, "Task could not enter running state");
        }
        let task = run.with_handoff(|h| h.task().to_string());
        run.publish(CrewEvent::TaskStarted {
            task_id: run.task_id().clone(),
            strategy: run.strategy(),
            task,
        });
        info!("Task started");

        engine_for(run.strategy()).execute(&run).await
    };

    // Nothing the task started may outlive it
    let stray = run.ctx.runner.stop_all(run.task_id()).await;
    if stray > 0 {
        warn!(count = stray, "Reaped workers still running at task end");
    }

    finalize(&run, outcome)
}

fn finalize(run: &TaskRun, outcome: Outcome) -> TaskSnapshot {
    let control = &run.ctx.control;
    let outcome = control.seal(|stop_requested| {
        if stop_requested {
            Outcome::Stopped
        } else {
            outcome
        }
    });
    let stop_reason = control
        .stop_reason()
        .unwrap_or_else(|| "stopped".to_string());
    let task_id = run.task_id().clone();

    let snapshot = run.update_session(|session| {
        let (state, event) = match &outcome {
            Outcome::Completed => (
                TaskState::Completed,
                CrewEvent::TaskCompleted {
                    task_id: task_id.clone(),
                    cost_usd: session.cost_usd(),
                    duration_ms: session.duration_ms(),
                },
            ),
            Outcome::Failed(reason) => (
                TaskState::Failed {
                    reason: reason.clone(),
                },
                CrewEvent::TaskFailed {
                    task_id: task_id.clone(),
                    reason: reason.clone(),
                },
            ),
            Outcome::Stopped => {
                session.mark_cancel_requested();
                session.stop_pending_stages(&stop_reason);
                (
                    TaskState::Stopped,
                    CrewEvent::TaskStopped {
                        task_id: task_id.clone(),
                        reason: stop_reason.clone(),
                    },
                )
            }
        };
        if let Err(e) = session.transition(state) {
            warn!(error = %e, "Task outcome rejected by state machine");
        }
        // Published before the terminal snapshot so waiters find it in history
        run.publish(event);
        session.snapshot()
    });

    info!(
        state = snapshot.state.label(),
        cost_usd = snapshot.cost_usd,
        duration_ms = snapshot.duration_ms,
        "Task finished"
    );
    snapshot
}
