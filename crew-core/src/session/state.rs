//! TaskSession: per-task state machine, stage tracking and cost aggregation

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

use super::types::{DispatchRecord, StageStatus, Strategy, TaskId, TaskState};

/// Stage label used for the single coordinator invocation of Team/Auto tasks
pub const COORDINATOR_STAGE: &str = "coordinator";

/// One user-initiated job
///
/// Owned exclusively by the task's engine while it runs; everyone else sees
/// [`TaskSnapshot`]s.
#[derive(Debug, Clone)]
pub struct TaskSession {
    id: TaskId,
    strategy: Strategy,
    task: String,
    working_dir: PathBuf,
    state: TaskState,
    stages: Vec<(String, StageStatus)>,
    dispatches: Vec<DispatchRecord>,
    cost_usd: f64,
    duration_ms: u64,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TaskSession {
    /// Create a pending session; Team/Auto get a single coordinator entry
    pub fn new(
        id: TaskId,
        strategy: Strategy,
        task: impl Into<String>,
        stages: &[String],
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let stages = match strategy {
            Strategy::Pipeline => stages
                .iter()
                .map(|name| (name.clone(), StageStatus::Pending))
                .collect(),
            Strategy::Team | Strategy::Auto => {
                vec![(COORDINATOR_STAGE.to_string(), StageStatus::Pending)]
            }
        };

        Self {
            id,
            strategy,
            task: task.into(),
            working_dir: working_dir.into(),
            state: TaskState::Pending,
            stages,
            dispatches: Vec::new(),
            cost_usd: 0.0,
            duration_ms: 0,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn dispatches(&self) -> &[DispatchRecord] {
        &self.dispatches
    }

    pub fn stage_status(&self, stage: &str) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, status)| status)
    }

    /// Move to `next`; states are never revisited and terminal states are final
    pub fn transition(&mut self, next: TaskState) -> Result<(), TaskError> {
        if !self.state.can_transition_to(&next) {
            return Err(TaskError::InvalidStateTransition {
                from: self.state.label().to_string(),
                to: next.label().to_string(),
            });
        }
        match &next {
            TaskState::Running => self.started_at = Some(Utc::now()),
            terminal if terminal.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        self.state = next;
        Ok(())
    }

    /// Set a stage's status, adding the stage if it is not yet tracked
    pub fn set_stage_status(&mut self, stage: &str, status: StageStatus) {
        match self.stages.iter_mut().find(|(name, _)| name == stage) {
            Some((_, existing)) => *existing = status,
            None => self.stages.push((stage.to_string(), status)),
        }
    }

    /// Mark every stage that never ran as stopped
    pub fn stop_pending_stages(&mut self, reason: &str) {
        for (_, status) in &mut self.stages {
            if matches!(status, StageStatus::Pending | StageStatus::Running) {
                *status = StageStatus::Stopped {
                    reason: reason.to_string(),
                };
            }
        }
    }

    /// Fold one final result into the task totals
    pub fn add_usage(&mut self, cost_usd: f64, duration_ms: u64) {
        if cost_usd.is_finite() && cost_usd > 0.0 {
            self.cost_usd += cost_usd;
        }
        self.duration_ms = self.duration_ms.saturating_add(duration_ms);
    }

    /// Record a dispatch; its cost counts towards the task unless the
    /// coordinator's own final result already includes it
    pub fn record_dispatch(&mut self, record: DispatchRecord, count_usage: bool) {
        if count_usage {
            self.add_usage(record.cost_usd, record.duration_ms);
        }
        self.dispatches.push(record);
    }

    /// Set the cancellation flag; it is never cleared
    pub fn mark_cancel_requested(&mut self) {
        self.cancel_requested = true;
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            strategy: self.strategy,
            task: self.task.clone(),
            working_dir: self.working_dir.clone(),
            state: self.state.clone(),
            stages: self
                .stages
                .iter()
                .map(|(name, status)| StageSnapshot {
                    name: name.clone(),
                    status: status.clone(),
                })
                .collect(),
            dispatches: self.dispatches.clone(),
            cost_usd: self.cost_usd,
            duration_ms: self.duration_ms,
            cancel_requested: self.cancel_requested,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub name: String,
    pub status: StageStatus,
}

/// Point-in-time copy of a task session for external callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub strategy: Strategy,
    pub task: String,
    pub working_dir: PathBuf,
    pub state: TaskState,
    pub stages: Vec<StageSnapshot>,
    pub dispatches: Vec<DispatchRecord>,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Dispatches attributed to `role`, in dispatch order
    pub fn dispatches_for<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a DispatchRecord> {
        self.dispatches.iter().filter(move |d| d.role == role)
    }

    /// Human-readable outcome: stage results, dispatches, totals
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Task {} ({}): {}",
            self.id.short(),
            self.strategy,
            self.state.label()
        );
        if let TaskState::Failed { reason } = &self.state {
            let _ = writeln!(out, "Reason: {reason}");
        }

        let width = self
            .stages
            .iter()
            .map(|s| s.name.chars().count())
            .max()
            .unwrap_or(0);
        for stage in &self.stages {
            let detail = match &stage.status {
                StageStatus::Completed {
                    cost_usd,
                    duration_ms,
                } => format!("${cost_usd:.4}  {}", format_duration(*duration_ms)),
                StageStatus::Failed { reason } | StageStatus::Stopped { reason } => reason.clone(),
                StageStatus::Pending | StageStatus::Running => String::new(),
            };
            let _ = writeln!(
                out,
                "  {:<width$}  {:<9}  {}",
                stage.name,
                stage.status.label(),
                detail
            );
        }

        if !self.dispatches.is_empty() {
            let _ = writeln!(out, "Dispatches:");
            for dispatch in &self.dispatches {
                let outcome = match (&dispatch.error, dispatch.ok) {
                    (_, true) => "ok".to_string(),
                    (Some(error), false) => format!("failed: {error}"),
                    (None, false) => "failed".to_string(),
                };
                let _ = writeln!(
                    out,
                    "  {} [{}]  {}  ${:.4}",
                    dispatch.role, dispatch.label, outcome, dispatch.cost_usd
                );
            }
        }

        let _ = write!(
            out,
            "Total: ${:.4}, {}",
            self.cost_usd,
            format_duration(self.duration_ms)
        );
        out
    }
}

/// Compact duration for terminal output: `850ms`, `1.2s`
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> TaskSession {
        TaskSession::new(
            TaskId::from("0192f3a1-0000"),
            Strategy::Pipeline,
            "Add health endpoint",
            &["product".to_string(), "development".to_string()],
            "/work",
        )
    }

    fn dispatch(role: &str, label: &str, ok: bool, cost: f64) -> DispatchRecord {
        DispatchRecord {
            role: role.to_string(),
            label: label.to_string(),
            output: format!("{role} output"),
            ok,
            error: (!ok).then(|| "worker exited with code 1".to_string()),
            cost_usd: cost,
            duration_ms: 100,
            ad_hoc: false,
        }
    }

    // ==================== State Machine Tests ====================

    #[test]
    fn new_session_is_pending_with_pending_stages() {
        let session = pipeline();
        assert_eq!(session.state(), &TaskState::Pending);
        assert_eq!(session.stage_status("product"), Some(&StageStatus::Pending));
        assert_eq!(session.stage_status("development"), Some(&StageStatus::Pending));
    }

    #[test]
    fn team_session_tracks_coordinator_only() {
        let session = TaskSession::new(TaskId::new(), Strategy::Team, "t", &[], "/work");
        assert_eq!(
            session.stage_status(COORDINATOR_STAGE),
            Some(&StageStatus::Pending)
        );
        assert_eq!(session.snapshot().stages.len(), 1);
    }

    #[test]
    fn transitions_record_timestamps() {
        let mut session = pipeline();
        session.transition(TaskState::Running).unwrap();
        assert!(session.snapshot().started_at.is_some());
        session.transition(TaskState::Completed).unwrap();
        assert!(session.snapshot().finished_at.is_some());
    }

    #[test]
    fn terminal_state_rejects_further_transitions() {
        let mut session = pipeline();
        session.transition(TaskState::Running).unwrap();
        session.transition(TaskState::Stopped).unwrap();

        let err = session.transition(TaskState::Completed).unwrap_err();
        assert_eq!(
            err,
            TaskError::InvalidStateTransition {
                from: "stopped".to_string(),
                to: "completed".to_string()
            }
        );
        assert_eq!(session.state(), &TaskState::Stopped);
    }

    #[test]
    fn running_cannot_return_to_pending() {
        let mut session = pipeline();
        session.transition(TaskState::Running).unwrap();
        assert!(session.transition(TaskState::Pending).is_err());
    }

    #[test]
    fn cancel_flag_is_sticky() {
        let mut session = pipeline();
        session.mark_cancel_requested();
        session.transition(TaskState::Running).unwrap();
        assert!(session.cancel_requested());
        assert!(session.snapshot().cancel_requested);
    }

    #[test]
    fn stop_pending_stages_leaves_finished_ones() {
        let mut session = pipeline();
        session.set_stage_status(
            "product",
            StageStatus::Completed {
                cost_usd: 0.1,
                duration_ms: 5,
            },
        );
        session.set_stage_status("development", StageStatus::Running);
        session.stop_pending_stages("stopped by user");

        assert_eq!(session.stage_status("product").map(|s| s.label()), Some("completed"));
        assert_eq!(session.stage_status("development").map(|s| s.label()), Some("stopped"));
    }

    // ==================== Aggregation Tests ====================

    #[test]
    fn usage_accumulates_monotonically() {
        let mut session = pipeline();
        session.add_usage(0.25, 100);
        session.add_usage(-1.0, 0);
        session.add_usage(f64::NAN, 0);
        session.add_usage(0.5, 50);
        assert!((session.cost_usd() - 0.75).abs() < 1e-9);
        assert_eq!(session.duration_ms(), 150);
    }

    #[test]
    fn dispatch_usage_counted_only_when_requested() {
        let mut session = TaskSession::new(TaskId::new(), Strategy::Team, "t", &[], "/work");
        session.record_dispatch(dispatch("development", "development#1", true, 0.5), true);
        session.record_dispatch(dispatch("review", "review#1", true, 0.5), false);
        assert!((session.cost_usd() - 0.5).abs() < 1e-9);
        assert_eq!(session.dispatches().len(), 2);
    }

    // ==================== Summary Tests ====================

    #[test]
    fn summary_lists_stages_and_totals() {
        let mut session = pipeline();
        session.transition(TaskState::Running).unwrap();
        session.set_stage_status(
            "product",
            StageStatus::Completed {
                cost_usd: 0.01,
                duration_ms: 1200,
            },
        );
        session.set_stage_status(
            "development",
            StageStatus::Failed {
                reason: "worker exited with code 1".to_string(),
            },
        );
        session.add_usage(0.01, 1200);
        session
            .transition(TaskState::Failed {
                reason: "stage development failed".to_string(),
            })
            .unwrap();

        let summary = session.snapshot().summary();
        assert!(summary.starts_with("Task 0192f3a1 (pipeline): failed"));
        assert!(summary.contains("Reason: stage development failed"));
        assert!(summary.contains("product"));
        assert!(summary.contains("$0.0100  1.2s"));
        assert!(summary.contains("worker exited with code 1"));
        assert!(summary.ends_with("Total: $0.0100, 1.2s"));
    }

    #[test]
    fn summary_attributes_dispatches_by_role() {
        let mut session = TaskSession::new(TaskId::new(), Strategy::Team, "t", &[], "/work");
        session.record_dispatch(dispatch("development", "development#1", true, 0.2), true);
        session.record_dispatch(dispatch("review", "review#1", false, 0.0), true);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.dispatches_for("development").count(), 1);
        let summary = snapshot.summary();
        assert!(summary.contains("development [development#1]  ok"));
        assert!(summary.contains("review [review#1]  failed: worker exited with code 1"));
    }

    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_value(pipeline().snapshot()).unwrap();
        assert_eq!(json["state"]["state"], "pending");
        assert_eq!(json["stages"][0]["status"]["status"], "pending");
    }
}
