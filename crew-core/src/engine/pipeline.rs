//! Pipeline strategy: a fixed stage list, strictly in order

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::events::CrewEvent;
use crate::runner::WorkerSpec;
use crate::session::{StageStatus, Strategy};

use super::worker::{StageOutcome, drive_worker};
use super::{Engine, Outcome, TaskRun};

/// Runs each stage once, in order, building every prompt from the outputs
/// of the stages before it. The first failing stage ends the task.
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineEngine;

impl PipelineEngine {
    fn fail_stage(run: &TaskRun, stage: &str, reason: &str) -> Outcome {
        run.update_session(|s| {
            s.set_stage_status(
                stage,
                StageStatus::Failed {
                    reason: reason.to_string(),
                },
            )
        });
        run.publish(CrewEvent::StageFailed {
            task_id: run.task_id().clone(),
            stage: stage.to_string(),
            reason: reason.to_string(),
        });
        Outcome::Failed(format!("stage {stage} failed: {reason}"))
    }
}

#[async_trait]
impl Engine for PipelineEngine {
    fn strategy(&self) -> Strategy {
        Strategy::Pipeline
    }

    #[instrument(skip_all, fields(task_id = %run.task_id()))]
    async fn execute(&self, run: &TaskRun) -> Outcome {
        let stages = run.with_handoff(|h| h.stages().to_vec());

        for stage in &stages {
            if run.ctx.control.is_stop_requested() {
                return Outcome::Stopped;
            }

            let agent = match run.ctx.registry.get(stage) {
                Ok(agent) => agent,
                Err(e) => return Self::fail_stage(run, stage, &e.to_string()),
            };

            let prompt = run.with_handoff(|h| h.build_prompt(stage));
            let spec = WorkerSpec::for_agent(
                run.task_id().clone(),
                stage.as_str(),
                &agent,
                prompt,
                run.working_dir(),
            );

            run.update_session(|s| s.set_stage_status(stage, StageStatus::Running));
            run.publish(CrewEvent::StageStarted {
                task_id: run.task_id().clone(),
                stage: stage.clone(),
            });
            info!(stage = %stage, "Stage started");

            let report = drive_worker(&run.ctx, spec, |_| {}).await;
            run.update_session(|s| s.add_usage(report.cost_usd, report.duration_ms));

            match report.outcome {
                StageOutcome::Succeeded => {
                    run.with_handoff(|h| h.record_output(stage, report.output.as_str()));
                    run.update_session(|s| {
                        s.set_stage_status(
                            stage,
                            StageStatus::Completed {
                                cost_usd: report.cost_usd,
                                duration_ms: report.duration_ms,
                            },
                        )
                    });
                    run.publish(CrewEvent::StageCompleted {
                        task_id: run.task_id().clone(),
                        stage: stage.clone(),
                        cost_usd: report.cost_usd,
                        duration_ms: report.duration_ms,
                    });
                    info!(stage = %stage, cost_usd = report.cost_usd, "Stage completed");
                }
                StageOutcome::Failed(reason) => return Self::fail_stage(run, stage, &reason),
                StageOutcome::Stopped => return Outcome::Stopped,
                StageOutcome::TimedOut => {
                    run.ctx
                        .control
                        .request_stop(format!("stage {stage} timed out"));
                    return Outcome::Stopped;
                }
            }
        }

        Outcome::Completed
    }
}
