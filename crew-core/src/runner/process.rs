//! Handles to running and finished worker processes

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::parser::StreamChunk;
use crate::session::TaskId;

/// Why a worker process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExitReason {
    /// The process exited on its own; `code` is `None` if it died from a signal
    Exited { code: Option<i32> },
    /// Terminated on request
    Stopped,
    /// Terminated because it overran its deadline
    TimedOut,
}

/// Outcome of a worker invocation, available once it has been reaped
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub reason: ExitReason,
    /// Whether a final-result chunk was seen on stdout
    pub saw_final_result: bool,
    /// Last lines written to stderr
    pub stderr_tail: Vec<String>,
    pub elapsed: Duration,
}

impl WorkerExit {
    /// Exit code zero and a final result was produced
    pub fn succeeded(&self) -> bool {
        self.reason == ExitReason::Exited { code: Some(0) } && self.saw_final_result
    }

    /// Human-readable failure description
    pub fn describe(&self) -> String {
        let base = match &self.reason {
            ExitReason::Exited { code: Some(0) } if !self.saw_final_result => {
                "worker exited without producing a final result".to_string()
            }
            ExitReason::Exited { code: Some(code) } => format!("worker exited with code {code}"),
            ExitReason::Exited { code: None } => "worker was killed by a signal".to_string(),
            ExitReason::Stopped => "worker was stopped".to_string(),
            ExitReason::TimedOut => "worker timed out".to_string(),
        };
        match self.stderr_tail.last() {
            Some(line) if !self.succeeded() => format!("{base}: {line}"),
            _ => base,
        }
    }
}

/// Shareable control handle for an active worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub task_id: TaskId,
    pub stage: String,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) done: watch::Receiver<bool>,
}

impl WorkerHandle {
    /// Signal the worker to terminate without waiting
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Terminate the worker and wait until it has been reaped
    pub async fn stop(&self) {
        self.request_stop();
        self.wait_done().await;
    }

    /// Wait until the worker has been reaped
    pub async fn wait_done(&self) {
        let mut done = self.done.clone();
        // Err means the supervisor is gone, which also means reaped
        let _ = done.wait_for(|finished| *finished).await;
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow()
    }
}

/// A started worker: its control handle, decoded output and eventual exit
#[derive(Debug)]
pub struct WorkerProcess {
    pub handle: WorkerHandle,
    chunks: mpsc::UnboundedReceiver<StreamChunk>,
    exit: oneshot::Receiver<WorkerExit>,
}

impl WorkerProcess {
    pub(crate) fn new(
        handle: WorkerHandle,
        chunks: mpsc::UnboundedReceiver<StreamChunk>,
        exit: oneshot::Receiver<WorkerExit>,
    ) -> Self {
        Self {
            handle,
            chunks,
            exit,
        }
    }

    /// Next decoded chunk in stdout order; `None` once the stream is closed
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        self.chunks.recv().await
    }

    /// Wait for the worker to be reaped
    pub async fn wait(self) -> WorkerExit {
        match self.exit.await {
            Ok(exit) => exit,
            // Supervisor dropped without reporting; treat as killed
            Err(_) => WorkerExit {
                reason: ExitReason::Exited { code: None },
                saw_final_result: false,
                stderr_tail: Vec::new(),
                elapsed: Duration::ZERO,
            },
        }
    }
}
