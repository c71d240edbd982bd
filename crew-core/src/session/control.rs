//! Cancellation handshake between task callers and the running engine

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct ControlState {
    /// The engine has committed to a terminal outcome
    sealed: bool,
    stop_reason: Option<String>,
}

/// Shared stop switch for one task
///
/// A stop request and the engine's final decision race; whichever takes the
/// lock first wins. Once a stop has been accepted the task can only end as
/// stopped, and once the outcome is sealed stop requests are refused.
#[derive(Debug, Default)]
pub struct TaskControl {
    cancel: CancellationToken,
    state: Mutex<ControlState>,
}

impl TaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the task to stop; returns true only for the request that took effect
    pub fn request_stop(&self, reason: impl Into<String>) -> bool {
        let mut state = self.state();
        if state.sealed || self.cancel.is_cancelled() {
            return false;
        }
        state.stop_reason = Some(reason.into());
        self.cancel.cancel();
        true
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once a stop has been requested
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.state().stop_reason.clone()
    }

    /// Commit the task's outcome; `decide` learns whether a stop was accepted
    pub fn seal<R>(&self, decide: impl FnOnce(bool) -> R) -> R {
        let mut state = self.state();
        state.sealed = true;
        decide(self.cancel.is_cancelled())
    }

    pub fn is_sealed(&self) -> bool {
        self.state().sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stop_request_wins() {
        let control = TaskControl::new();
        assert!(control.request_stop("user"));
        assert!(!control.request_stop("again"));
        assert!(control.is_stop_requested());
        assert_eq!(control.stop_reason().as_deref(), Some("user"));
    }

    #[test]
    fn sealed_task_refuses_stop() {
        let control = TaskControl::new();
        let stopped = control.seal(|stop_requested| stop_requested);
        assert!(!stopped);
        assert!(!control.request_stop("late"));
        assert!(!control.is_stop_requested());
    }

    #[test]
    fn seal_observes_earlier_stop() {
        let control = TaskControl::new();
        control.request_stop("user");
        assert!(control.seal(|stop_requested| stop_requested));
        assert!(control.is_sealed());
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_request() {
        let control = std::sync::Arc::new(TaskControl::new());
        let waiter = {
            let control = std::sync::Arc::clone(&control);
            tokio::spawn(async move { control.cancelled().await })
        };
        control.request_stop("user");
        waiter.await.unwrap();
    }
}
