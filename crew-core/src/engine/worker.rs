//! Driving one worker invocation from start to reaped exit

use tracing::{debug, warn};

use crate::events::CrewEvent;
use crate::parser::StreamChunk;
use crate::runner::{ExitReason, WorkerSpec};

use super::EngineContext;

/// How a stage or dispatched invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    /// Launch failure, nonzero exit, missing or erroneous final result
    Failed(String),
    Stopped,
    TimedOut,
}

/// What one worker invocation produced
#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: String,
    /// Captured output handed to later stages
    pub output: String,
    /// From the final result; zero when none was produced
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub outcome: StageOutcome,
}

impl StageReport {
    fn launch_failed(stage: String, reason: String) -> Self {
        Self {
            stage,
            output: String::new(),
            cost_usd: 0.0,
            duration_ms: 0,
            outcome: StageOutcome::Failed(reason),
        }
    }

    /// Failure text for sessions, events and coordinators
    pub fn failure_reason(&self) -> Option<String> {
        match &self.outcome {
            StageOutcome::Succeeded => None,
            StageOutcome::Failed(reason) => Some(reason.clone()),
            StageOutcome::Stopped => Some("worker was stopped".to_string()),
            StageOutcome::TimedOut => Some("worker timed out".to_string()),
        }
    }
}

/// Start a worker, forward its chunks, and wait until it is reaped
///
/// Every chunk is published as [`CrewEvent::AgentOutput`] and handed to
/// `on_chunk`. A stop request on the task stops the worker. The captured
/// output is the final result's text, or the concatenated text deltas when
/// the result carries none.
pub(crate) async fn drive_worker<F>(
    ctx: &EngineContext,
    spec: WorkerSpec,
    mut on_chunk: F,
) -> StageReport
where
    F: FnMut(&StreamChunk) + Send,
{
    let task_id = spec.task_id.clone();
    let stage = spec.stage.clone();

    let mut worker = match ctx.runner.start(spec).await {
        Ok(worker) => worker,
        Err(e) => {
            warn!(task_id = %task_id, stage = %stage, error = %e, "Worker failed to launch");
            return StageReport::launch_failed(stage, e.to_string());
        }
    };

    let mut text = String::new();
    let mut final_result: Option<(f64, u64, bool, Option<String>)> = None;
    let mut stop_sent = false;

    loop {
        tokio::select! {
            chunk = worker.next_chunk() => {
                let Some(chunk) = chunk else { break };
                match &chunk {
                    StreamChunk::TextDelta { text: delta } => text.push_str(delta),
                    StreamChunk::FinalResult { cost_usd, duration_ms, is_error, result, .. } => {
                        final_result = Some((*cost_usd, *duration_ms, *is_error, result.clone()));
                    }
                    StreamChunk::Error { message, .. } => {
                        debug!(task_id = %task_id, stage = %stage, %message, "Worker output error");
                    }
                    _ => {}
                }
                on_chunk(&chunk);
                ctx.bus.publish(CrewEvent::AgentOutput {
                    task_id: task_id.clone(),
                    stage: stage.clone(),
                    chunk,
                });
            }
            _ = ctx.control.cancelled(), if !stop_sent => {
                stop_sent = true;
                worker.handle.request_stop();
            }
        }
    }

    let exit = worker.wait().await;

    let (cost_usd, duration_ms, result_is_error, result_text) = match final_result {
        Some((cost, duration, is_error, result)) => (cost, duration, is_error, result),
        None => (0.0, 0, false, None),
    };

    let outcome = match exit.reason {
        ExitReason::Stopped => StageOutcome::Stopped,
        ExitReason::TimedOut => StageOutcome::TimedOut,
        _ if !exit.succeeded() => StageOutcome::Failed(exit.describe()),
        _ if result_is_error => StageOutcome::Failed(format!(
            "worker reported an error: {}",
            result_text.as_deref().unwrap_or("no details")
        )),
        _ => StageOutcome::Succeeded,
    };

    let output = match result_text {
        Some(result) if !result.trim().is_empty() => result,
        _ => text,
    };

    StageReport {
        stage,
        output,
        cost_usd,
        duration_ms,
        outcome,
    }
}
