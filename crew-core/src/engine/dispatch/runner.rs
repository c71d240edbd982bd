//! Dispatcher that runs each dispatched role as its own worker process

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::agent::AgentDefinition;
use crate::config::AdHocConfig;
use crate::events::CrewEvent;
use crate::runner::WorkerSpec;
use crate::session::DispatchRecord;

use super::super::TaskRun;
use super::super::worker::{StageOutcome, drive_worker};
use super::{DispatchRequest, DispatchResponse, Dispatcher, LabelCounter};

/// Which role names a coordinator may dispatch
#[derive(Debug, Clone)]
pub enum RolePolicy {
    /// Only registered roles; unknown names fail back to the coordinator
    RegistryOnly,
    /// Unknown names become ad hoc roles with these defaults
    AdHoc(AdHocConfig),
}

/// Runs dispatched roles through the task's process runner
///
/// At most `max_parallel_workers` dispatched workers run at once per task;
/// further requests wait for a slot.
pub struct RunnerDispatcher {
    run: TaskRun,
    policy: RolePolicy,
    permits: Arc<Semaphore>,
    labels: LabelCounter,
}

impl RunnerDispatcher {
    pub fn new(run: TaskRun, policy: RolePolicy) -> Self {
        let slots = run.ctx.config.max_parallel_workers.max(1);
        Self {
            run,
            policy,
            permits: Arc::new(Semaphore::new(slots)),
            labels: LabelCounter::default(),
        }
    }

    fn resolve(&self, request: &DispatchRequest) -> Result<(Arc<AgentDefinition>, bool), String> {
        match self.run.ctx.registry.get(&request.role) {
            Ok(agent) => Ok((agent, false)),
            Err(e) => match &self.policy {
                RolePolicy::RegistryOnly => Err(format!(
                    "{e}. Available agents: {}",
                    self.run.ctx.registry.names().join(", ")
                )),
                RolePolicy::AdHoc(defaults) => Ok((
                    Arc::new(AgentDefinition::ad_hoc(
                        &request.role,
                        request.system_prompt.clone(),
                        request
                            .allowed_tools
                            .clone()
                            .unwrap_or_else(|| defaults.allowed_tools.clone()),
                        request.max_turns.unwrap_or(defaults.max_turns),
                    )),
                    true,
                )),
            },
        }
    }

    /// Record a finished dispatch on the session and the bus
    fn complete(&self, record: DispatchRecord) -> DispatchResponse {
        let response = DispatchResponse::from(&record);
        self.run.publish(CrewEvent::DispatchCompleted {
            task_id: self.run.task_id().clone(),
            role: record.role.clone(),
            label: record.label.clone(),
            ok: record.ok,
            cost_usd: record.cost_usd,
            duration_ms: record.duration_ms,
        });
        self.run.update_session(|s| s.record_dispatch(record, true));
        response
    }

    fn rejected(&self, role: &str, label: String, error: String, ad_hoc: bool) -> DispatchResponse {
        warn!(task_id = %self.run.task_id(), role, %error, "Dispatch rejected");
        self.complete(DispatchRecord {
            role: role.to_string(),
            label,
            output: String::new(),
            ok: false,
            error: Some(error),
            cost_usd: 0.0,
            duration_ms: 0,
            ad_hoc,
        })
    }
}

#[async_trait]
impl Dispatcher for RunnerDispatcher {
    async fn dispatch(&self, request: DispatchRequest) -> DispatchResponse {
        let role = request.role.trim().to_string();
        let label = self.labels.next(&role);

        self.run.publish(CrewEvent::DispatchStarted {
            task_id: self.run.task_id().clone(),
            role: role.clone(),
            label: label.clone(),
        });

        if self.run.ctx.control.is_stop_requested() {
            return self.rejected(&role, label, "task is stopping".to_string(), false);
        }

        let (agent, ad_hoc) = match self.resolve(&request) {
            Ok(resolved) => resolved,
            Err(error) => return self.rejected(&role, label, error, false),
        };

        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return self.rejected(&role, label, "dispatcher closed".to_string(), ad_hoc),
        };

        let prompt = self
            .run
            .with_handoff(|h| h.build_assignment_prompt(&role, &request.task));
        let spec = WorkerSpec::for_agent(
            self.run.task_id().clone(),
            label.as_str(),
            &agent,
            prompt,
            self.run.working_dir(),
        );

        info!(task_id = %self.run.task_id(), role = %role, label = %label, ad_hoc, "Dispatching");
        let report = drive_worker(&self.run.ctx, spec, |_| {}).await;

        let ok = report.outcome == StageOutcome::Succeeded;
        if ok {
            self.run
                .with_handoff(|h| h.record_output(&role, report.output.as_str()));
        }

        self.complete(DispatchRecord {
            role,
            label,
            ok,
            error: report.failure_reason(),
            output: report.output,
            cost_usd: report.cost_usd,
            duration_ms: report.duration_ms,
            ad_hoc,
        })
    }
}
