//! Team and Auto strategies: one coordinating worker dispatches the others

use std::fmt::Write as _;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::agent::{AgentDefinition, AgentRegistry};
use crate::config::DispatchMode;
use crate::events::CrewEvent;
use crate::runner::WorkerSpec;
use crate::session::{COORDINATOR_STAGE, StageStatus, Strategy};

use super::dispatch::{DispatchBackend, DispatchNotice, RemoteBackend, RolePolicy, SpawnBackend};
use super::worker::{StageOutcome, drive_worker};
use super::{Engine, Outcome, TaskRun};

const COORDINATOR_SYSTEM_PROMPT: &str = "You coordinate a team of agents. You do not do the \
    work yourself: break the task into assignments, dispatch each to the right agent, read \
    what they return, and decide what happens next.";

/// Runs a single coordinator invocation that dispatches sub-agents
///
/// Team restricts the coordinator to registered roles and honors the
/// configured dispatch mode. Auto lets it invent roles, which only the
/// remote backend can run.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorEngine {
    strategy: Strategy,
}

impl CoordinatorEngine {
    pub fn team() -> Self {
        Self {
            strategy: Strategy::Team,
        }
    }

    pub fn auto() -> Self {
        Self {
            strategy: Strategy::Auto,
        }
    }

    fn mode(&self, run: &TaskRun) -> DispatchMode {
        match self.strategy {
            Strategy::Auto => DispatchMode::Remote,
            _ => run.ctx.config.dispatch_mode,
        }
    }

    fn policy(&self, run: &TaskRun) -> RolePolicy {
        match self.strategy {
            Strategy::Auto => RolePolicy::AdHoc(run.ctx.config.ad_hoc.clone()),
            _ => RolePolicy::RegistryOnly,
        }
    }

    fn backend(&self, run: &TaskRun) -> Box<dyn DispatchBackend> {
        match self.mode(run) {
            DispatchMode::Spawn => Box::new(SpawnBackend::new(run.ctx.registry.clone())),
            DispatchMode::Remote => Box::new(RemoteBackend::new(run.clone(), self.policy(run))),
        }
    }

    fn prompt(&self, run: &TaskRun) -> String {
        let (task, working_dir) =
            run.with_handoff(|h| (h.task().to_string(), h.working_dir().display().to_string()));
        coordinator_prompt(
            &task,
            &run.ctx.registry,
            self.strategy == Strategy::Auto,
            &working_dir,
        )
    }

    fn fail(run: &TaskRun, reason: &str) -> Outcome {
        run.update_session(|s| {
            s.set_stage_status(
                COORDINATOR_STAGE,
                StageStatus::Failed {
                    reason: reason.to_string(),
                },
            )
        });
        run.publish(CrewEvent::StageFailed {
            task_id: run.task_id().clone(),
            stage: COORDINATOR_STAGE.to_string(),
            reason: reason.to_string(),
        });
        Outcome::Failed(format!("coordinator failed: {reason}"))
    }
}

fn coordinator_prompt(
    task: &str,
    registry: &AgentRegistry,
    ad_hoc: bool,
    working_dir: &str,
) -> String {
    let mut prompt = format!("# Task\n\n{task}\n\n## Available agents\n\n");
    if registry.is_empty() {
        prompt.push_str("(none registered)\n");
    }
    for (name, agent) in registry.all() {
        if agent.description.is_empty() {
            let _ = writeln!(prompt, "- {name}");
        } else {
            let _ = writeln!(prompt, "- {name}: {}", agent.description);
        }
    }
    if ad_hoc {
        prompt.push_str(
            "\nYou may also define new roles when none of these fit; give each a name and a \
             system prompt describing its job.\n",
        );
    }
    let _ = write!(
        prompt,
        "\n## How to work\n\n\
         Dispatch agents one at a time when each needs the previous result, or several at \
         once when their work is independent. When the task is done, reply with a final \
         report of what each agent did and the overall result.\n\n\
         Work in {working_dir}.\n"
    );
    prompt
}

/// Record a backend notice on the session and the bus
fn apply_notice(run: &TaskRun, notice: DispatchNotice) {
    match notice {
        DispatchNotice::Started { role, label } => {
            info!(task_id = %run.task_id(), role = %role, label = %label, "Dispatch observed");
            run.publish(CrewEvent::DispatchStarted {
                task_id: run.task_id().clone(),
                role,
                label,
            });
        }
        DispatchNotice::Completed(record) => {
            if record.ok {
                run.with_handoff(|h| h.record_output(&record.role, record.output.as_str()));
            }
            run.publish(CrewEvent::DispatchCompleted {
                task_id: run.task_id().clone(),
                role: record.role.clone(),
                label: record.label.clone(),
                ok: record.ok,
                cost_usd: record.cost_usd,
                duration_ms: record.duration_ms,
            });
            // Spawned children are billed inside the coordinator's own result
            run.update_session(|s| s.record_dispatch(record, false));
        }
    }
}

#[async_trait]
impl Engine for CoordinatorEngine {
    fn strategy(&self) -> Strategy {
        self.strategy
    }

    #[instrument(skip_all, fields(task_id = %run.task_id(), strategy = %self.strategy))]
    async fn execute(&self, run: &TaskRun) -> Outcome {
        if run.ctx.control.is_stop_requested() {
            return Outcome::Stopped;
        }

        let coordinator = &run.ctx.config.coordinator;
        let agent = AgentDefinition::new(
            COORDINATOR_STAGE,
            COORDINATOR_SYSTEM_PROMPT,
            coordinator.max_turns,
        )
        .with_tools(coordinator.allowed_tools.iter().cloned());
        let mut spec = WorkerSpec::for_agent(
            run.task_id().clone(),
            COORDINATOR_STAGE,
            &agent,
            self.prompt(run),
            run.working_dir(),
        );

        let mut backend = self.backend(run);
        if let Err(e) = backend.attach(&mut spec).await {
            warn!(error = %e, "Dispatch backend failed to start");
            return Self::fail(run, &e.to_string());
        }

        run.update_session(|s| s.set_stage_status(COORDINATOR_STAGE, StageStatus::Running));
        run.publish(CrewEvent::StageStarted {
            task_id: run.task_id().clone(),
            stage: COORDINATOR_STAGE.to_string(),
        });
        info!(mode = ?backend.mode(), "Coordinator started");

        let report = drive_worker(&run.ctx, spec, |chunk| {
            for notice in backend.observe(chunk) {
                apply_notice(run, notice);
            }
        })
        .await;

        for notice in backend.finish().await {
            apply_notice(run, notice);
        }
        run.update_session(|s| s.add_usage(report.cost_usd, report.duration_ms));

        match report.outcome {
            StageOutcome::Succeeded => {
                run.with_handoff(|h| h.record_output(COORDINATOR_STAGE, report.output.as_str()));
                run.update_session(|s| {
                    s.set_stage_status(
                        COORDINATOR_STAGE,
                        StageStatus::Completed {
                            cost_usd: report.cost_usd,
                            duration_ms: report.duration_ms,
                        },
                    )
                });
                run.publish(CrewEvent::StageCompleted {
                    task_id: run.task_id().clone(),
                    stage: COORDINATOR_STAGE.to_string(),
                    cost_usd: report.cost_usd,
                    duration_ms: report.duration_ms,
                });
                info!(cost_usd = report.cost_usd, "Coordinator completed");
                Outcome::Completed
            }
            StageOutcome::Failed(reason) => Self::fail(run, &reason),
            StageOutcome::Stopped => Outcome::Stopped,
            StageOutcome::TimedOut => {
                run.ctx
                    .control
                    .request_stop(format!("stage {COORDINATOR_STAGE} timed out"));
                Outcome::Stopped
            }
        }
    }
}
