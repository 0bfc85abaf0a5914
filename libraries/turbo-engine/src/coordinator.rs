//! Engine Coordinator.
//!
//! One supervisor task per configured role launches the instance, polls its
//! health endpoint on a fixed cadence, restarts it after too many consecutive
//! failures (with exponential backoff) and finally marks the role degraded
//! once the restart budget is spent. Each supervisor is the only writer of its
//! role's `EngineHealth`; everybody else reads it through a `watch` channel.

use crate::error::{EngineError, Result};
use crate::launcher::{EngineLauncher, EngineProcess, ENGINE_STOP_GRACE};
use crate::policy::RestartPolicy;
use crate::probe::HealthProbe;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use turbo_core::config::EngineSettings;
use turbo_core::{EngineHealth, EngineReadiness, EngineRole};

struct RoleHandle {
    settings: EngineSettings,
    health: watch::Receiver<EngineHealth>,
    task: JoinHandle<()>,
}

/// Supervises every configured engine role.
pub struct EngineCoordinator {
    roles: BTreeMap<EngineRole, RoleHandle>,
    cancel: CancellationToken,
}

impl EngineCoordinator {
    /// Launch every configured engine and start supervising it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        engines: &[EngineSettings],
        launcher: Arc<dyn EngineLauncher>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self::start_with_grace(engines, launcher, probe, ENGINE_STOP_GRACE)
    }

    /// Like [`EngineCoordinator::start`] with a custom stop grace period.
    pub fn start_with_grace(
        engines: &[EngineSettings],
        launcher: Arc<dyn EngineLauncher>,
        probe: Arc<dyn HealthProbe>,
        stop_grace: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut roles = BTreeMap::new();

        for settings in engines {
            let (tx, rx) = watch::channel(EngineHealth::starting(
                settings.role,
                settings.api_address.clone(),
            ));

            let supervisor = RoleSupervisor {
                policy: RestartPolicy::from_settings(settings),
                settings: settings.clone(),
                launcher: Arc::clone(&launcher),
                probe: Arc::clone(&probe),
                health: tx,
                cancel: cancel.child_token(),
                stop_grace,
            };

            let task = tokio::spawn(supervisor.run());
            roles.insert(
                settings.role,
                RoleHandle {
                    settings: settings.clone(),
                    health: rx,
                    task,
                },
            );
        }

        info!(roles = roles.len(), "Engine coordinator started");
        Self { roles, cancel }
    }

    /// Configured roles, in order
    pub fn roles(&self) -> Vec<EngineRole> {
        self.roles.keys().copied().collect()
    }

    /// Latest health of one role
    pub fn health(&self, role: EngineRole) -> Option<EngineHealth> {
        self.roles.get(&role).map(|h| h.health.borrow().clone())
    }

    /// Latest health of every role
    pub fn snapshot(&self) -> Vec<EngineHealth> {
        self.roles
            .values()
            .map(|h| h.health.borrow().clone())
            .collect()
    }

    /// Subscribe to health changes of one role
    pub fn subscribe(&self, role: EngineRole) -> Option<watch::Receiver<EngineHealth>> {
        self.roles.get(&role).map(|h| h.health.clone())
    }

    /// Readiness gate for jobs depending on `required` roles
    pub fn gate(&self, required: &[EngineRole]) -> EngineGate {
        EngineGate {
            receivers: self.roles.values().map(|h| h.health.clone()).collect(),
            required: required.iter().copied().collect(),
        }
    }

    /// Wait until `role` is healthy.
    ///
    /// Gives up after the role's `startup_attempts` health intervals, or as
    /// soon as the role is degraded.
    pub async fn ensure_ready(&self, role: EngineRole) -> Result<()> {
        let handle = self.roles.get(&role).ok_or(EngineError::UnknownRole(role))?;
        let mut rx = handle.health.clone();
        let budget = handle
            .settings
            .health_interval()
            .saturating_mul(handle.settings.startup_attempts.max(1));

        let waited =
            tokio::time::timeout(budget, rx.wait_for(|h| h.readiness() != EngineReadiness::Starting))
                .await;

        match waited {
            Err(_) => Err(EngineError::Unavailable {
                role,
                message: format!(
                    "not healthy after {} health checks",
                    handle.settings.startup_attempts
                ),
            }),
            Ok(Err(_)) => Err(EngineError::Unavailable {
                role,
                message: "supervisor stopped".to_string(),
            }),
            Ok(Ok(health)) => {
                let (degraded, restarts) = (health.degraded, health.restart_count);
                drop(health);
                if degraded {
                    Err(EngineError::Degraded { role, restarts })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Wait for every role, returning each role's result
    pub async fn ensure_all_ready(&self) -> Vec<(EngineRole, Result<()>)> {
        let mut results = Vec::with_capacity(self.roles.len());
        for role in self.roles() {
            results.push((role, self.ensure_ready(role).await));
        }
        results
    }

    /// Stop supervising and tear down every engine instance
    pub async fn shutdown(self) {
        info!("Shutting down engines");
        self.cancel.cancel();
        for (role, handle) in self.roles {
            if let Err(e) = handle.task.await {
                error!(role = %role, "Engine supervisor task failed: {}", e);
            }
        }
    }
}

/// Read-only view of engine health used to gate job dispatch.
#[derive(Debug, Clone, Default)]
pub struct EngineGate {
    receivers: Vec<watch::Receiver<EngineHealth>>,
    required: HashSet<EngineRole>,
}

impl EngineGate {
    /// Gate over no engines; always ready
    pub fn open() -> Self {
        Self::default()
    }

    /// Gate over explicit receivers
    pub fn new(receivers: Vec<watch::Receiver<EngineHealth>>, required: &[EngineRole]) -> Self {
        Self {
            receivers,
            required: required.iter().copied().collect(),
        }
    }

    /// Combined readiness of the required roles
    pub fn readiness(&self) -> EngineReadiness {
        let mut readiness = EngineReadiness::Ready;
        for rx in &self.receivers {
            let health = rx.borrow();
            if !self.required.contains(&health.role) {
                continue;
            }
            match health.readiness() {
                EngineReadiness::Degraded => return EngineReadiness::Degraded,
                EngineReadiness::Starting => readiness = EngineReadiness::Starting,
                EngineReadiness::Ready => {}
            }
        }
        readiness
    }

    /// Required roles that are permanently degraded
    pub fn degraded_roles(&self) -> Vec<EngineRole> {
        self.receivers
            .iter()
            .map(|rx| rx.borrow().clone())
            .filter(|h| h.degraded && self.required.contains(&h.role))
            .map(|h| h.role)
            .collect()
    }

    /// Health of every engine, required or not
    pub fn snapshot(&self) -> Vec<EngineHealth> {
        self.receivers.iter().map(|rx| rx.borrow().clone()).collect()
    }

    /// Receivers to subscribe to for change notifications
    pub fn receivers(&self) -> &[watch::Receiver<EngineHealth>] {
        &self.receivers
    }
}

struct RoleSupervisor {
    settings: EngineSettings,
    policy: RestartPolicy,
    launcher: Arc<dyn EngineLauncher>,
    probe: Arc<dyn HealthProbe>,
    health: watch::Sender<EngineHealth>,
    cancel: CancellationToken,
    stop_grace: Duration,
}

impl RoleSupervisor {
    async fn run(self) {
        let role = self.settings.role;
        let period = self.settings.health_interval();
        let mut process = self.launch().await;

        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let alive = match process.as_mut().map(|p| p.has_exited()) {
                Some(Ok(exited)) => !exited,
                Some(Err(e)) => {
                    warn!(role = %role, "Cannot query engine process: {}", e);
                    true
                }
                None => false,
            };

            let result = if alive {
                self.probe
                    .check(role, self.settings.health_url(), self.settings.health_timeout())
                    .await
            } else {
                Err(EngineError::Unavailable {
                    role,
                    message: "engine process is not running".to_string(),
                })
            };

            let failures = match result {
                Ok(()) => {
                    self.record_success();
                    continue;
                }
                Err(e) => self.record_failure(&e),
            };

            if alive && !self.policy.should_restart(failures) {
                continue;
            }

            let restart_count = self.health.borrow().restart_count;
            if !self.policy.can_restart(restart_count) {
                self.mark_degraded(&mut process).await;
                // Keep the sender alive so readers still see the final state
                self.cancel.cancelled().await;
                return;
            }

            let restart = restart_count + 1;
            let backoff = self.policy.backoff_for(restart);
            warn!(
                role = %role,
                restart,
                failures,
                backoff_ms = backoff.as_millis() as u64,
                "Restarting engine"
            );

            self.stop(&mut process).await;
            self.health.send_modify(|h| {
                h.restart_count = restart;
                h.consecutive_failures = 0;
                h.healthy = false;
                h.pid = None;
            });

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(backoff) => {}
            }

            process = self.launch().await;
            ticker.reset();
        }

        self.stop(&mut process).await;
        self.health.send_modify(|h| {
            h.healthy = false;
            h.pid = None;
        });
        debug!(role = %role, "Engine supervisor stopped");
    }

    async fn launch(&self) -> Option<Box<dyn EngineProcess>> {
        match self.launcher.launch(&self.settings).await {
            Ok(process) => {
                let pid = process.pid();
                self.health.send_modify(|h| {
                    h.pid = pid;
                    h.last_error = None;
                });
                Some(process)
            }
            Err(e) => {
                error!(role = %self.settings.role, "Engine launch failed: {}", e);
                self.health.send_modify(|h| {
                    h.pid = None;
                    h.last_error = Some(e.to_string());
                });
                None
            }
        }
    }

    async fn stop(&self, process: &mut Option<Box<dyn EngineProcess>>) {
        if let Some(mut running) = process.take() {
            if let Err(e) = running.shutdown(self.stop_grace).await {
                warn!(role = %self.settings.role, "Engine shutdown failed: {}", e);
            }
        }
    }

    fn record_success(&self) {
        let was_healthy = self.health.borrow().healthy;
        self.health.send_modify(|h| {
            h.healthy = true;
            h.consecutive_failures = 0;
            h.last_checked_at = Some(Utc::now());
            h.last_error = None;
        });
        if !was_healthy {
            info!(role = %self.settings.role, "Engine healthy");
        }
    }

    fn record_failure(&self, err: &EngineError) -> u32 {
        let mut failures = 0;
        self.health.send_modify(|h| {
            h.healthy = false;
            h.consecutive_failures += 1;
            h.last_checked_at = Some(Utc::now());
            h.last_error = Some(err.to_string());
            failures = h.consecutive_failures;
        });
        debug!(role = %self.settings.role, failures, "Engine health check failed: {}", err);
        failures
    }

    async fn mark_degraded(&self, process: &mut Option<Box<dyn EngineProcess>>) {
        self.stop(process).await;
        let restarts = self.health.borrow().restart_count;
        self.health.send_modify(|h| {
            h.degraded = true;
            h.healthy = false;
            h.pid = None;
        });
        error!(
            role = %self.settings.role,
            restarts,
            "Engine permanently degraded, restart budget exhausted"
        );
    }
}
