/// Dependency and environment checks for `turbosync check`
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use turbo_core::SyncConfig;

/// How long a `version` probe may take
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// File written and removed to prove the local root is writable
const PROBE_FILE: &str = ".turbosync-check";

/// Result of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            detail: detail.into(),
        }
    }

    /// One line for the terminal
    pub fn line(&self) -> String {
        format!(
            "[{}] {}: {}",
            if self.ok { " ok " } else { "FAIL" },
            self.name,
            self.detail
        )
    }
}

/// Run every check against `config`
pub async fn run_checks(config: &SyncConfig) -> Vec<CheckResult> {
    let mut results = vec![
        binary_runs("sync engine", &config.executor.binary, "version").await,
    ];
    for engine in &config.engines {
        results.push(
            binary_runs(&format!("{} engine", engine.role), &engine.binary, "--version").await,
        );
    }
    results.push(remote_root(&config.paths.remote_root));
    results.push(local_root(&config.paths.local_root));
    results
}

/// The binary starts and exits successfully
pub async fn binary_runs(name: &str, binary: &Path, arg: &str) -> CheckResult {
    let mut command = Command::new(binary);
    command
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
        Err(_) => CheckResult::fail(name, format!("{} did not answer", binary.display())),
        Ok(Err(e)) => CheckResult::fail(name, format!("cannot run {}: {}", binary.display(), e)),
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let version = stdout.lines().next().unwrap_or("").trim();
            CheckResult::pass(
                name,
                if version.is_empty() {
                    binary.display().to_string()
                } else {
                    version.to_string()
                },
            )
        }
        Ok(Ok(output)) => CheckResult::fail(
            name,
            format!("{} exited with {}", binary.display(), output.status),
        ),
    }
}

/// The remote root is mounted
pub fn remote_root(path: &Path) -> CheckResult {
    if path.is_dir() {
        CheckResult::pass("remote root", path.display().to_string())
    } else {
        CheckResult::fail(
            "remote root",
            format!("{} is not a mounted directory", path.display()),
        )
    }
}

/// The local root exists (or can be created) and is writable
pub fn local_root(path: &Path) -> CheckResult {
    if let Err(e) = std::fs::create_dir_all(path) {
        return CheckResult::fail(
            "local root",
            format!("cannot create {}: {}", path.display(), e),
        );
    }

    let probe = path.join(PROBE_FILE);
    let written = std::fs::write(&probe, b"turbosync").and_then(|()| std::fs::remove_file(&probe));
    match written {
        Ok(()) => CheckResult::pass("local root", path.display().to_string()),
        Err(e) => CheckResult::fail(
            "local root",
            format!("{} is not writable: {}", path.display(), e),
        ),
    }
}
