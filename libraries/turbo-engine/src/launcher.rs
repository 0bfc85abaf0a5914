//! Engine process launching.

use crate::error::{EngineError, Result};
use crate::process::{stop_child, StopOutcome};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};
use turbo_core::config::EngineSettings;
use turbo_core::EngineRole;

/// Grace period between the terminate request and the force kill.
pub const ENGINE_STOP_GRACE: Duration = Duration::from_secs(10);

/// A running engine instance.
#[async_trait]
pub trait EngineProcess: Send {
    /// OS process id, if known
    fn pid(&self) -> Option<u32>;

    /// Whether the process has exited on its own
    fn has_exited(&mut self) -> Result<bool>;

    /// Stop the instance, gracefully first
    async fn shutdown(&mut self, grace: Duration) -> Result<()>;
}

/// Starts engine instances for a role.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, settings: &EngineSettings) -> Result<Box<dyn EngineProcess>>;
}

/// Build the argument list for an engine instance.
///
/// No shell is involved; each element is passed to the process as-is.
pub fn launch_args(settings: &EngineSettings) -> Vec<String> {
    let mut args = vec![
        format!("--home={}", settings.home_dir().display()),
        "--no-browser".to_string(),
        format!("--gui-address={}", settings.api_address),
    ];

    if let Some(log_file) = &settings.log_file {
        args.push(format!("--logfile={}", log_file.display()));
        args.push("--log-max-old-files=3".to_string());
    }

    args.extend(settings.extra_args.iter().cloned());
    args
}

/// Launches engines as real child processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineLauncher for ProcessLauncher {
    async fn launch(&self, settings: &EngineSettings) -> Result<Box<dyn EngineProcess>> {
        let home = settings.home_dir();
        tokio::fs::create_dir_all(&home)
            .await
            .map_err(|e| EngineError::Launch {
                role: settings.role,
                message: format!("cannot create home {}: {}", home.display(), e),
            })?;

        if let Some(parent) = settings.log_file.as_ref().and_then(|f| f.parent()) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let args = launch_args(settings);
        debug!(role = %settings.role, binary = ?settings.binary, args = ?args, "Launching engine");

        let mut command = Command::new(&settings.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Own process group so terminal signals aimed at us don't hit the engine
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| EngineError::Launch {
            role: settings.role,
            message: format!("{}: {}", settings.binary.display(), e),
        })?;

        info!(
            role = %settings.role,
            pid = ?child.id(),
            address = %settings.api_address,
            "Engine launched"
        );

        Ok(Box::new(ChildEngine {
            role: settings.role,
            child,
        }))
    }
}

/// Engine instance backed by a child process.
struct ChildEngine {
    role: EngineRole,
    child: Child,
}

#[async_trait]
impl EngineProcess for ChildEngine {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn has_exited(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        match stop_child(&mut self.child, grace).await? {
            StopOutcome::AlreadyExited(status) => {
                debug!(role = %self.role, "Engine already exited with {}", status);
            }
            StopOutcome::Graceful(status) => {
                info!(role = %self.role, "Engine stopped ({})", status);
            }
            StopOutcome::Killed => {
                info!(role = %self.role, "Engine force-killed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn launch_args_include_role_specific_addresses() {
        let mut settings = EngineSettings::new(EngineRole::Destination, "127.0.0.1:28386");
        settings.home_dir = Some(PathBuf::from("/tmp/engine-dest"));

        assert_eq!(
            launch_args(&settings),
            vec![
                "--home=/tmp/engine-dest",
                "--no-browser",
                "--gui-address=127.0.0.1:28386",
            ]
        );
    }

    #[test]
    fn launch_args_append_log_file_and_extras() {
        let mut settings = EngineSettings::new(EngineRole::Source, "127.0.0.1:28384");
        settings.home_dir = Some(PathBuf::from("/h"));
        settings.log_file = Some(PathBuf::from("/logs/source.log"));
        settings.extra_args = vec!["--no-restart".to_string()];

        let args = launch_args(&settings);
        assert_eq!(args[3], "--logfile=/logs/source.log");
        assert_eq!(args[4], "--log-max-old-files=3");
        assert_eq!(args.last().map(String::as_str), Some("--no-restart"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let home = tempfile::TempDir::new().unwrap();
        let mut settings = EngineSettings::new(EngineRole::Source, "127.0.0.1:1");
        settings.binary = PathBuf::from("/nonexistent/turbosync-engine");
        settings.home_dir = Some(home.path().join("source"));

        let result = ProcessLauncher::new().launch(&settings).await;
        assert!(matches!(result, Err(EngineError::Launch { .. })));
        assert!(home.path().join("source").is_dir());
    }
}
