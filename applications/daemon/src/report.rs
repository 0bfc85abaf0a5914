/// Status feed adapters used by the daemon
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use turbo_core::{
    EngineReadiness, EngineRole, StatusReporter, StatusSnapshot, SyncStatus, SyncTarget, TargetId,
    TargetState,
};

/// Forwards every snapshot to several reporters
#[derive(Default, Clone)]
pub struct FanoutReporter {
    reporters: Vec<Arc<dyn StatusReporter>>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }
}

impl StatusReporter for FanoutReporter {
    fn report(&self, snapshot: &StatusSnapshot) {
        for reporter in &self.reporters {
            reporter.report(snapshot);
        }
    }
}

#[derive(Debug, Default)]
struct Seen {
    targets: HashMap<TargetId, (TargetState, SyncStatus)>,
    engines: HashMap<EngineRole, (EngineReadiness, u32)>,
    watch: Option<(bool, bool)>,
}

/// Logs one line per observable change; optionally prints JSON snapshots
#[derive(Debug, Default)]
pub struct LogReporter {
    json_lines: bool,
    seen: Mutex<Seen>,
}

impl LogReporter {
    pub fn new(json_lines: bool) -> Self {
        Self {
            json_lines,
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Human readable description of every change since the last snapshot
    fn changes(&self, snapshot: &StatusSnapshot) -> Vec<String> {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let mut lines = Vec::new();

        let current: HashMap<&TargetId, &SyncTarget> =
            snapshot.targets.iter().map(|t| (&t.id, t)).collect();
        seen.targets.retain(|id, _| {
            let keep = current.contains_key(id);
            if !keep {
                lines.push(format!("{}: removed", id));
            }
            keep
        });

        for target in &snapshot.targets {
            let now = (target.state, target.last_status);
            if seen.targets.get(&target.id) == Some(&now) {
                continue;
            }
            seen.targets.insert(target.id.clone(), now);
            lines.push(describe_target(target));
        }

        for engine in &snapshot.engines {
            let now = (engine.readiness(), engine.restart_count);
            if seen.engines.get(&engine.role) == Some(&now) {
                continue;
            }
            seen.engines.insert(engine.role, now);
            lines.push(format!(
                "engine {}: {:?} (restarts: {})",
                engine.role, now.0, engine.restart_count
            ));
        }

        let watch = (snapshot.watch_enabled, snapshot.watch_available);
        if seen.watch != Some(watch) {
            seen.watch = Some(watch);
            lines.push(format!(
                "file watching: {}{}",
                if watch.0 { "enabled" } else { "disabled" },
                if watch.1 { "" } else { " (unavailable)" }
            ));
        }

        lines
    }
}

impl StatusReporter for LogReporter {
    fn report(&self, snapshot: &StatusSnapshot) {
        for line in self.changes(snapshot) {
            tracing::info!("{}", line);
        }

        if self.json_lines {
            match serde_json::to_string(snapshot) {
                Ok(json) => {
                    let mut out = std::io::stdout().lock();
                    let _ = writeln!(out, "{}", json);
                    let _ = out.flush();
                }
                Err(e) => tracing::warn!("Failed to serialize status: {}", e),
            }
        }
    }
}

fn describe_target(target: &SyncTarget) -> String {
    let mut line = format!("{}: {} ({})", target.id, target.state, target.last_status);
    if target.last_status == SyncStatus::Failed {
        if let Some(message) = &target.last_message {
            line.push_str(": ");
            line.push_str(message);
        }
    }
    line
}

/// Table of targets and engines for the `status` stdin command
pub fn render_status(snapshot: &StatusSnapshot) -> String {
    let width = snapshot
        .targets
        .iter()
        .map(|t| t.id.as_str().len())
        .max()
        .unwrap_or(0)
        .max("TARGET".len());

    let mut out = format!(
        "{:<width$}  {:<9}  {:<9}  {}\n",
        "TARGET",
        "STATE",
        "STATUS",
        "LAST SYNC",
        width = width
    );
    for target in &snapshot.targets {
        let last_sync = target
            .last_sync_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<width$}  {:<9}  {:<9}  {}\n",
            target.id.as_str(),
            target.state.as_str(),
            target.last_status.as_str(),
            last_sync,
            width = width
        ));
    }

    for engine in &snapshot.engines {
        out.push_str(&format!(
            "engine {}: {:?}, restarts {}\n",
            engine.role,
            engine.readiness(),
            engine.restart_count
        ));
    }
    out.push_str(&format!(
        "watch: {}\n",
        if snapshot.watch_enabled { "on" } else { "off" }
    ));
    out
}
