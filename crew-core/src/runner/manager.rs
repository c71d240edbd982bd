//! ProcessRunner: starts, supervises and stops worker processes

use std::collections::{HashMap, VecDeque};
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::RunnerError;
use crate::parser::{StreamChunk, parse_all};
use crate::session::TaskId;

use super::launcher::{WorkerLauncher, WorkerSpec};
use super::process::{ExitReason, WorkerExit, WorkerHandle, WorkerProcess};
use super::terminate::{isolate_process_group, kill_group, terminate};

/// Lines of stderr kept for failure reports
const STDERR_TAIL_LINES: usize = 20;

/// How long to keep draining stderr after the worker has been reaped
const STDERR_DRAIN: Duration = Duration::from_millis(500);

/// How long to keep reading stdout once the worker itself has exited
const STDOUT_DRAIN: Duration = Duration::from_millis(500);

type WorkerKey = (TaskId, String);
type ActiveWorkers = Arc<RwLock<HashMap<WorkerKey, WorkerHandle>>>;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,
    /// Deadline for a single invocation
    pub timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for RunnerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            timeout: config.stage_timeout(),
        }
    }
}

/// Starts worker processes and tracks the active ones per task and stage
///
/// Every started worker is eventually reaped, whether it exits on its own,
/// is stopped, or overruns its deadline.
pub struct ProcessRunner {
    launcher: Arc<dyn WorkerLauncher>,
    config: RunnerConfig,
    active: ActiveWorkers,
    generation: AtomicU64,
}

impl ProcessRunner {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: RunnerConfig) -> Self {
        Self {
            launcher,
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Launch a worker and begin streaming its decoded output
    pub async fn start(&self, spec: WorkerSpec) -> Result<WorkerProcess, RunnerError> {
        let key = (spec.task_id.clone(), spec.stage.clone());

        // Held across spawn so two starts for the same key cannot both succeed
        let mut active = self.active.write().await;
        if active.contains_key(&key) {
            return Err(RunnerError::AlreadyActive {
                task_id: spec.task_id.to_string(),
                stage: spec.stage.clone(),
            });
        }

        if !spec.working_dir.is_dir() {
            return Err(RunnerError::LaunchFailed {
                stage: spec.stage.clone(),
                source: io::Error::new(
                    io::ErrorKind::NotFound,
                    format!(
                        "working directory {} does not exist",
                        spec.working_dir.display()
                    ),
                ),
            });
        }

        let mut cmd = self.launcher.command(&spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                RunnerError::WorkerNotFound {
                    program: self.launcher.program(),
                }
            } else {
                RunnerError::LaunchFailed {
                    stage: spec.stage.clone(),
                    source: e,
                }
            }
        })?;

        let stdout = child.stdout.take().ok_or(RunnerError::StdoutUnavailable)?;
        let stderr = child.stderr.take();

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (done_tx, done_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        let handle = WorkerHandle {
            task_id: spec.task_id.clone(),
            stage: spec.stage.clone(),
            pid: child.id(),
            started_at: Utc::now(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            cancel: cancel.clone(),
            done: done_rx,
        };
        active.insert(key.clone(), handle.clone());
        drop(active);

        info!(
            task_id = %spec.task_id,
            stage = %spec.stage,
            pid = ?handle.pid,
            "Worker started"
        );

        let supervision = Supervision {
            key,
            generation: handle.generation,
            chunks: chunk_tx,
            exit: exit_tx,
            done: done_tx,
            cancel,
            grace: self.config.grace_period,
            timeout: self.config.timeout,
            active: Arc::clone(&self.active),
        };
        tokio::spawn(supervise(child, stdout, stderr, supervision));

        Ok(WorkerProcess::new(handle, chunk_rx, exit_rx))
    }

    /// Stop the worker for `(task_id, stage)` and wait until it is reaped
    ///
    /// Returns false if no such worker is active.
    pub async fn stop(&self, task_id: &TaskId, stage: &str) -> bool {
        let handle = self
            .active
            .read()
            .await
            .get(&(task_id.clone(), stage.to_string()))
            .cloned();

        match handle {
            Some(handle) => {
                info!(task_id = %task_id, stage = %stage, "Stopping worker");
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every active worker of a task; returns how many were signalled
    pub async fn stop_all(&self, task_id: &TaskId) -> usize {
        let handles = self.active_for(task_id).await;
        for handle in &handles {
            handle.request_stop();
        }
        for handle in &handles {
            handle.wait_done().await;
        }
        if !handles.is_empty() {
            info!(task_id = %task_id, count = handles.len(), "Stopped workers");
        }
        handles.len()
    }

    /// Active workers belonging to a task
    pub async fn active_for(&self, task_id: &TaskId) -> Vec<WorkerHandle> {
        self.active
            .read()
            .await
            .iter()
            .filter(|((id, _), _)| id == task_id)
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Number of active workers across all tasks
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}

struct Supervision {
    key: WorkerKey,
    generation: u64,
    chunks: mpsc::UnboundedSender<StreamChunk>,
    exit: oneshot::Sender<WorkerExit>,
    done: watch::Sender<bool>,
    cancel: CancellationToken,
    grace: Duration,
    timeout: Option<Duration>,
    active: ActiveWorkers,
}

enum Interrupt {
    Exited(io::Result<std::process::ExitStatus>),
    Stopped,
    TimedOut,
}

async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Pump stdout into decoded chunks, then reap the worker
async fn supervise(
    mut child: Child,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    ctx: Supervision,
) {
    let started = Instant::now();
    let (task_id, stage) = &ctx.key;

    let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
    let stderr_task = stderr.map(|pipe| {
        tokio::spawn(collect_stderr(
            pipe,
            stage.clone(),
            Arc::clone(&stderr_tail),
        ))
    });

    let deadline = ctx.timeout.map(|timeout| started + timeout);
    let pid = child.id();
    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_open = true;
    let mut saw_final_result = false;

    let interrupt = loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break Interrupt::Stopped,
            _ = until_deadline(deadline) => break Interrupt::TimedOut,
            // Background descendants can hold stdout open long after the worker exits
            status = child.wait() => break Interrupt::Exited(status),
            line = lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => saw_final_result |= forward_line(&line, &ctx.chunks),
                Ok(None) => stdout_open = false,
                Err(e) => {
                    warn!(task_id = %task_id, stage = %stage, error = %e, "Failed to read worker stdout");
                    stdout_open = false;
                }
            },
        }
    };

    if matches!(interrupt, Interrupt::Exited(_)) {
        if stdout_open {
            let drain = async {
                while let Ok(Some(line)) = lines.next_line().await {
                    saw_final_result |= forward_line(&line, &ctx.chunks);
                }
            };
            if tokio::time::timeout(STDOUT_DRAIN, drain).await.is_err() {
                debug!(task_id = %task_id, stage = %stage, "Stdout still open after exit");
            }
        }
        if let Some(pid) = pid {
            kill_group(pid);
        }
    }

    let reason = match interrupt {
        Interrupt::Exited(Ok(status)) => ExitReason::Exited {
            code: status.code(),
        },
        Interrupt::Exited(Err(e)) => {
            warn!(task_id = %task_id, stage = %stage, error = %e, "Failed to wait for worker");
            ExitReason::Exited { code: None }
        }
        Interrupt::Stopped => {
            terminate(&mut child, ctx.grace).await;
            ExitReason::Stopped
        }
        Interrupt::TimedOut => {
            warn!(task_id = %task_id, stage = %stage, timeout = ?ctx.timeout, "Worker timed out");
            terminate(&mut child, ctx.grace).await;
            ExitReason::TimedOut
        }
    };

    if let Some(task) = stderr_task
        && tokio::time::timeout(STDERR_DRAIN, task).await.is_err()
    {
        debug!(task_id = %task_id, stage = %stage, "Stderr still open after exit");
    }
    let stderr_tail: Vec<String> = stderr_tail
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect();

    {
        let mut active = ctx.active.write().await;
        if active
            .get(&ctx.key)
            .is_some_and(|handle| handle.generation == ctx.generation)
        {
            active.remove(&ctx.key);
        }
    }

    let exit = WorkerExit {
        reason,
        saw_final_result,
        stderr_tail,
        elapsed: started.elapsed(),
    };
    info!(
        task_id = %task_id,
        stage = %stage,
        reason = ?exit.reason,
        elapsed_ms = exit.elapsed.as_millis() as u64,
        "Worker finished"
    );

    // Close the chunk stream before reporting the exit
    drop(ctx.chunks);
    let _ = ctx.done.send(true);
    let _ = ctx.exit.send(exit);
}

/// Decode one stdout line onto the chunk stream; reports whether it held the final result
fn forward_line(line: &str, chunks: &mpsc::UnboundedSender<StreamChunk>) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    let mut saw_final_result = false;
    for chunk in parse_all(line) {
        saw_final_result |= chunk.is_final();
        // Receiver may be gone; keep draining so the pipe never fills
        let _ = chunks.send(chunk);
    }
    saw_final_result
}

async fn collect_stderr(pipe: ChildStderr, stage: String, tail: Arc<Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stage = %stage, "worker stderr: {}", line);
        let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tokio::process::Command;

    /// Runs each spec's prompt as a shell script
    struct ShellLauncher;

    impl WorkerLauncher for ShellLauncher {
        fn command(&self, spec: &WorkerSpec) -> Command {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(&spec.prompt).current_dir(&spec.working_dir);
            cmd
        }

        fn program(&self) -> String {
            "/bin/sh".to_string()
        }
    }

    struct MissingLauncher;

    impl WorkerLauncher for MissingLauncher {
        fn command(&self, _spec: &WorkerSpec) -> Command {
            Command::new(self.program())
        }

        fn program(&self) -> String {
            "/nonexistent/crew-worker-binary".to_string()
        }
    }

    fn spec(stage: &str, script: &str) -> WorkerSpec {
        WorkerSpec {
            task_id: TaskId::from("task-1"),
            stage: stage.to_string(),
            prompt: script.to_string(),
            system_prompt: String::new(),
            allowed_tools: Vec::new(),
            max_turns: 1,
            working_dir: std::env::temp_dir(),
            env: BTreeMap::new(),
            extra_args: Vec::new(),
        }
    }

    fn runner(timeout: Option<Duration>) -> ProcessRunner {
        ProcessRunner::new(
            Arc::new(ShellLauncher),
            RunnerConfig {
                grace_period: Duration::from_millis(300),
                timeout,
            },
        )
    }

    const FINAL: &str =
        r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":5,"total_cost_usd":0.25}"#;

    // ==================== Start Tests ====================

    #[tokio::test]
    async fn streams_chunks_in_order_then_exits() {
        let runner = runner(None);
        let script = format!(
            r#"echo '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"one"}}]}}}}'
echo ''
echo '{{"type":"assistant","message":{{"content":[{{"type":"text","text":"two"}}]}}}}'
echo '{FINAL}'"#
        );
        let mut worker = runner.start(spec("dev", &script)).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = worker.next_chunk().await {
            chunks.push(chunk);
        }
        let exit = worker.wait().await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[0],
            StreamChunk::TextDelta {
                text: "one".to_string()
            }
        );
        assert!(chunks[2].is_final());
        assert!(exit.succeeded());
        assert_eq!(runner.active_count().await, 0);
    }

    #[tokio::test]
    async fn background_child_holding_stdout_does_not_block_exit() {
        let runner = runner(None);
        let script = format!("echo '{FINAL}'\n(sleep 30) &\nexit 0");
        let started = std::time::Instant::now();
        let mut worker = runner.start(spec("dev", &script)).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = worker.next_chunk().await {
            chunks.push(chunk);
        }
        let exit = worker.wait().await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_final());
        assert_eq!(exit.reason, ExitReason::Exited { code: Some(0) });
        assert!(exit.succeeded());
        assert_eq!(runner.active_count().await, 0);
    }

    #[tokio::test]
    async fn nonzero_exit_keeps_stderr_tail() {
        let runner = runner(None);
        let worker = runner
            .start(spec("dev", "echo 'bad credentials' >&2; exit 4"))
            .await
            .unwrap();
        let exit = worker.wait().await;

        assert_eq!(exit.reason, ExitReason::Exited { code: Some(4) });
        assert!(!exit.succeeded());
        assert_eq!(exit.stderr_tail, vec!["bad credentials".to_string()]);
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let runner = ProcessRunner::new(Arc::new(MissingLauncher), RunnerConfig::default());
        let err = runner.start(spec("dev", "")).await.unwrap_err();
        assert!(matches!(err, RunnerError::WorkerNotFound { .. }));
        assert_eq!(runner.active_count().await, 0);
    }

    #[tokio::test]
    async fn missing_working_dir_is_launch_failure() {
        let runner = runner(None);
        let mut spec = spec("dev", "true");
        spec.working_dir = PathBuf::from("/nonexistent/crew-workdir");
        let err = runner.start(spec).await.unwrap_err();
        assert!(matches!(err, RunnerError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn duplicate_stage_is_rejected_while_active() {
        let runner = runner(None);
        let _worker = runner.start(spec("dev", "sleep 30")).await.unwrap();
        let err = runner.start(spec("dev", "true")).await.unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyActive { .. }));
        runner.stop_all(&TaskId::from("task-1")).await;
    }

    // ==================== Stop Tests ====================

    #[tokio::test]
    async fn stop_terminates_and_reaps() {
        let runner = runner(None);
        let worker = runner.start(spec("dev", "sleep 30")).await.unwrap();
        let task_id = TaskId::from("task-1");

        assert!(runner.stop(&task_id, "dev").await);
        assert!(worker.handle.is_finished());
        assert!(runner.active_for(&task_id).await.is_empty());
        assert_eq!(worker.wait().await.reason, ExitReason::Stopped);

        // Already stopped: nothing to do
        assert!(!runner.stop(&task_id, "dev").await);
    }

    #[tokio::test]
    async fn stop_escalates_past_ignored_sigterm() {
        let runner = runner(None);
        let worker = runner
            .start(spec("dev", "trap '' TERM; while true; do sleep 1; done"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        assert!(runner.stop(&TaskId::from("task-1"), "dev").await);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(worker.wait().await.reason, ExitReason::Stopped);
    }

    #[tokio::test]
    async fn stop_all_only_touches_one_task() {
        let runner = runner(None);
        let _a = runner.start(spec("a", "sleep 30")).await.unwrap();
        let _b = runner.start(spec("b", "sleep 30")).await.unwrap();
        let mut other = spec("a", "sleep 30");
        other.task_id = TaskId::from("task-2");
        let _c = runner.start(other).await.unwrap();

        assert_eq!(runner.stop_all(&TaskId::from("task-1")).await, 2);
        assert_eq!(runner.active_count().await, 1);
        assert_eq!(runner.stop_all(&TaskId::from("task-2")).await, 1);
    }

    #[tokio::test]
    async fn timeout_terminates_worker() {
        let runner = runner(Some(Duration::from_millis(200)));
        let worker = runner.start(spec("dev", "sleep 30")).await.unwrap();
        let exit = worker.wait().await;
        assert_eq!(exit.reason, ExitReason::TimedOut);
        assert!(!exit.succeeded());
    }
}
