//! Graceful-then-forced termination of worker process groups

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Make the child lead its own process group so that everything it spawns
/// can be signalled together
pub(crate) fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    // Negative pid addresses the whole process group
    let result = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if result == 0 {
        return true;
    }
    // Group already gone or never formed; fall back to the leader
    unsafe { libc::kill(pid as libc::pid_t, signal) == 0 }
}

/// Kill whatever is left in a reaped worker's process group
///
/// Only the group is addressed: the leader's pid may already belong to an
/// unrelated process.
pub(crate) fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: kill has no memory-safety preconditions
        let result = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        if result == 0 {
            debug!(pid, "Killed leftover processes in worker group");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Ask the worker to exit, wait up to `grace`, then force-kill
///
/// Returns the exit status once the leader has been reaped, or `None` if
/// reaping failed.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id()
            && signal_group(pid, libc::SIGTERM)
        {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    // Leader is gone; make sure stragglers in its group are too
                    signal_group(pid, libc::SIGKILL);
                    return Some(status);
                }
                Ok(Err(e)) => warn!(pid, error = %e, "Failed to wait for worker after SIGTERM"),
                Err(_) => debug!(pid, ?grace, "Worker ignored SIGTERM, escalating to SIGKILL"),
            }
            signal_group(pid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed, worker probably already exited");
    }
    match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(error = %e, "Failed to reap worker");
            None
        }
    }
}
