//! Graceful stop of child processes.
//!
//! Shared by engine instances and sync job subprocesses: ask politely first,
//! force-kill once the grace period runs out.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, warn};

/// How a stopped process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Already exited before the stop request
    AlreadyExited(ExitStatus),
    /// Exited within the grace period after the graceful signal
    Graceful(ExitStatus),
    /// Had to be force-killed
    Killed,
}

/// Send the graceful termination signal to a process.
///
/// On Unix this is `SIGTERM`, delivered via `kill(1)`; elsewhere there is no
/// graceful variant and the caller falls through to the force kill.
pub async fn request_stop(pid: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let status = tokio::process::Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;
        if !status.success() {
            debug!(pid, "kill -TERM returned {}", status);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }

    Ok(())
}

/// Stop a child: graceful signal, wait up to `grace`, then force-kill.
pub async fn stop_child(child: &mut Child, grace: Duration) -> std::io::Result<StopOutcome> {
    if let Some(status) = child.try_wait()? {
        return Ok(StopOutcome::AlreadyExited(status));
    }

    if let Some(pid) = child.id() {
        if let Err(e) = request_stop(pid).await {
            warn!(pid, "Failed to send graceful stop: {}", e);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(StopOutcome::Graceful(status?)),
        Err(_) => {
            warn!(
                pid = ?child.id(),
                "Process did not stop within {:?}, killing",
                grace
            );
            child.kill().await?;
            Ok(StopOutcome::Killed)
        }
    }
}
