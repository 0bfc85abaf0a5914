/// Immutable configuration snapshot
///
/// Built once at startup (see the daemon's loader) and shared as
/// `Arc<SyncConfig>`. Components never mutate it; a reload means building new
/// components from a new snapshot.
use crate::error::{Result, TurboError};
use crate::types::EngineRole;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder replaced by the target's remote path
pub const REMOTE_PLACEHOLDER: &str = "{remote}";
/// Placeholder replaced by the target's local path
pub const LOCAL_PLACEHOLDER: &str = "{local}";
/// Placeholder replaced by the target id
pub const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    pub paths: PathSettings,

    #[serde(default = "default_schedule")]
    pub schedule: ScheduleSettings,

    #[serde(default = "default_watch")]
    pub watch: WatchSettings,

    #[serde(default = "default_executor")]
    pub executor: ExecutorSettings,

    #[serde(default)]
    pub engines: Vec<EngineSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathSettings {
    /// Mounted remote tree that is scanned for markers
    pub remote_root: PathBuf,

    /// Local tree that mirrors the remote root
    pub local_root: PathBuf,

    #[serde(default = "default_marker_names")]
    pub marker_names: Vec<String>,

    /// Maximum walk depth below the remote root, unbounded when unset
    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default)]
    pub follow_links: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    #[serde(default = "default_max_parallel_jobs")]
    pub max_parallel_jobs: usize,

    /// Automatic retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_secs")]
    pub retry_base_delay_secs: u64,

    #[serde(default = "default_retry_max_delay_secs")]
    pub retry_max_delay_secs: u64,

    /// How long running jobs get to stop on shutdown before being killed
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSettings {
    /// Sync engine binary (looked up on `PATH` when not absolute)
    #[serde(default = "default_executor_binary")]
    pub binary: PathBuf,

    /// Argument template; each element is one argument after substitution
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Appended after the template
    #[serde(default = "default_extra_options")]
    pub extra_options: Vec<String>,

    /// Exit codes that trigger one immediate `--resync` re-run
    #[serde(default = "default_resync_exit_codes")]
    pub resync_exit_codes: Vec<i32>,

    /// Non-zero exit codes classified as fatal; every other non-zero code is transient
    #[serde(default = "default_fatal_exit_codes")]
    pub fatal_exit_codes: Vec<i32>,

    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Time between the graceful stop signal and the force kill
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,

    /// Engine roles a job depends on; all configured roles when unset
    #[serde(default)]
    pub required_roles: Option<Vec<EngineRole>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    pub role: EngineRole,

    #[serde(default = "default_engine_binary")]
    pub binary: PathBuf,

    /// Engine state directory, `.turbosync/<role>` when unset
    #[serde(default)]
    pub home_dir: Option<PathBuf>,

    /// Listener address for the engine API/GUI (host:port)
    pub api_address: String,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    /// Consecutive failed checks before a restart
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Health checks `ensure_ready` waits through before giving up
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,

    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl SyncConfig {
    /// Configuration with defaults for everything but the two roots
    pub fn new(remote_root: impl Into<PathBuf>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathSettings {
                remote_root: remote_root.into(),
                local_root: local_root.into(),
                marker_names: default_marker_names(),
                max_depth: None,
                follow_links: false,
            },
            schedule: default_schedule(),
            watch: default_watch(),
            executor: default_executor(),
            engines: Vec::new(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_root("remote_root", &self.paths.remote_root)?;
        validate_root("local_root", &self.paths.local_root)?;

        if self.paths.marker_names.iter().all(|name| name.trim().is_empty()) {
            return Err(TurboError::config("paths.marker_names must not be empty"));
        }

        if self.schedule.max_parallel_jobs == 0 {
            return Err(TurboError::config(
                "schedule.max_parallel_jobs must be at least 1",
            ));
        }

        if self.schedule.scan_interval_secs == 0 {
            return Err(TurboError::config(
                "schedule.scan_interval_secs must be at least 1",
            ));
        }

        if self.executor.binary.as_os_str().is_empty() {
            return Err(TurboError::config("executor.binary must not be empty"));
        }

        for placeholder in [REMOTE_PLACEHOLDER, LOCAL_PLACEHOLDER] {
            if !self.executor.args.iter().any(|arg| arg.contains(placeholder)) {
                return Err(TurboError::config(format!(
                    "executor.args must reference {}",
                    placeholder
                )));
            }
        }

        let mut roles = HashSet::new();
        let mut addresses = HashSet::new();
        for engine in &self.engines {
            if !roles.insert(engine.role) {
                return Err(TurboError::config(format!(
                    "engine role {} is configured more than once",
                    engine.role
                )));
            }
            if engine.api_address.trim().is_empty() {
                return Err(TurboError::config(format!(
                    "engine {} has an empty api_address",
                    engine.role
                )));
            }
            if !addresses.insert(engine.api_address.as_str()) {
                return Err(TurboError::config(format!(
                    "engine api_address {} is shared by several roles",
                    engine.api_address
                )));
            }
            if engine.failure_threshold == 0 {
                return Err(TurboError::config(format!(
                    "engine {} failure_threshold must be at least 1",
                    engine.role
                )));
            }
            if engine.health_interval_secs == 0 || engine.health_timeout_ms == 0 {
                return Err(TurboError::config(format!(
                    "engine {} health_interval_secs and health_timeout_ms must be positive",
                    engine.role
                )));
            }
        }

        if let Some(required) = &self.executor.required_roles {
            if let Some(missing) = required.iter().find(|role| !roles.contains(*role)) {
                return Err(TurboError::config(format!(
                    "executor.required_roles names {} but no such engine is configured",
                    missing
                )));
            }
        }

        Ok(())
    }

    /// Engine roles every job depends on
    pub fn required_roles(&self) -> Vec<EngineRole> {
        match &self.executor.required_roles {
            Some(roles) => roles.clone(),
            None => self.engines.iter().map(|engine| engine.role).collect(),
        }
    }

    /// Settings for one engine role
    pub fn engine(&self, role: EngineRole) -> Option<&EngineSettings> {
        self.engines.iter().find(|engine| engine.role == role)
    }
}

fn validate_root(name: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(TurboError::config(format!("paths.{} is required", name)));
    }
    if !path.is_absolute() {
        return Err(TurboError::config(format!(
            "paths.{} must be absolute, got {}",
            name,
            path.display()
        )));
    }
    Ok(())
}

impl ScheduleSettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Backoff before retry number `retry` (1-based): base * 2^(retry-1), capped
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let secs = self
            .retry_base_delay_secs
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_delay_secs);
        Duration::from_secs(secs)
    }
}

impl WatchSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl ExecutorSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

impl EngineSettings {
    /// Settings with defaults for a role listening on `api_address`
    pub fn new(role: EngineRole, api_address: impl Into<String>) -> Self {
        Self {
            role,
            binary: default_engine_binary(),
            home_dir: None,
            api_address: api_address.into(),
            health_path: default_health_path(),
            health_interval_secs: default_health_interval_secs(),
            health_timeout_ms: default_health_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            max_restarts: default_max_restarts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            startup_attempts: default_startup_attempts(),
            extra_args: Vec::new(),
            log_file: None,
        }
    }

    pub fn home_dir(&self) -> PathBuf {
        self.home_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".turbosync").join(self.role.as_str()))
    }

    pub fn health_url(&self) -> String {
        format!("http://{}{}", self.api_address, self.health_path)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

// Default values
fn default_marker_names() -> Vec<String> {
    vec![".livework".to_string(), "livework".to_string()]
}

fn default_schedule() -> ScheduleSettings {
    ScheduleSettings {
        scan_interval_secs: default_scan_interval_secs(),
        max_parallel_jobs: default_max_parallel_jobs(),
        max_retries: default_max_retries(),
        retry_base_delay_secs: default_retry_base_delay_secs(),
        retry_max_delay_secs: default_retry_max_delay_secs(),
        shutdown_grace_secs: default_shutdown_grace_secs(),
    }
}

fn default_scan_interval_secs() -> u64 {
    300
}

fn default_max_parallel_jobs() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_secs() -> u64 {
    10
}

fn default_retry_max_delay_secs() -> u64 {
    300
}

fn default_shutdown_grace_secs() -> u64 {
    15
}

fn default_watch() -> WatchSettings {
    WatchSettings {
        enabled: default_enabled(),
        debounce_ms: default_debounce_ms(),
    }
}

fn default_enabled() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_executor() -> ExecutorSettings {
    ExecutorSettings {
        binary: default_executor_binary(),
        args: default_args(),
        extra_options: default_extra_options(),
        resync_exit_codes: default_resync_exit_codes(),
        fatal_exit_codes: default_fatal_exit_codes(),
        job_timeout_secs: default_job_timeout_secs(),
        kill_grace_secs: default_kill_grace_secs(),
        output_tail_lines: default_output_tail_lines(),
        required_roles: None,
    }
}

fn default_executor_binary() -> PathBuf {
    PathBuf::from("rclone")
}

fn default_args() -> Vec<String> {
    [
        "bisync",
        "{remote}/",
        "{local}/",
        "--create-empty-src-dirs",
        "--exclude",
        "/.**",
        "--exclude",
        "node_modules/**",
    ]
    .iter()
    .map(|arg| (*arg).to_string())
    .collect()
}

fn default_extra_options() -> Vec<String> {
    vec!["--transfers=4".to_string(), "--checkers=8".to_string()]
}

fn default_resync_exit_codes() -> Vec<i32> {
    vec![7, 9]
}

fn default_fatal_exit_codes() -> Vec<i32> {
    vec![1, 3, 4]
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_kill_grace_secs() -> u64 {
    10
}

fn default_output_tail_lines() -> usize {
    50
}

fn default_engine_binary() -> PathBuf {
    PathBuf::from("syncthing")
}

fn default_health_path() -> String {
    "/rest/noauth/health".to_string()
}

fn default_health_interval_secs() -> u64 {
    10
}

fn default_health_timeout_ms() -> u64 {
    2000
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_restarts() -> u32 {
    5
}

fn default_backoff_initial_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_startup_attempts() -> u32 {
    15
}
