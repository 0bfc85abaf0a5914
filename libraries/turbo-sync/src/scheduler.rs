//! Sync Scheduler
//!
//! One control loop owns all scheduling decisions. Timer ticks, debounced
//! watch notifications, front-end commands, engine health changes, retry
//! timers and job completions all arrive as [`SchedulerEvent`]s on a single
//! channel and are handled strictly in order.
//!
//! Per-target lifecycle:
//!
//! ```text
//! Idle -> Queued -> Running -> Idle (succeeded | failed)
//!                           -> Retrying -> Queued -> Running ...
//! ```
//!
//! Jobs run on spawned tasks; the loop only awaits its inbox and registry
//! updates, so a slow subprocess never stalls scheduling.

use crate::error::{Result, SyncError};
use crate::executor::SyncExecutor;
use crate::registry::{RegistryUpdate, TargetRegistry};
use crate::watcher::{run_debouncer, FileWatcher, SharedTargetIndex, TargetIndex};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use turbo_core::{
    Command, CommandReceiver, EngineReadiness, FailureKind, StatusReporter, StatusSnapshot,
    SyncConfig, SyncJob, SyncStatus, SyncTrigger, TargetId, TargetState, TriggerScope,
};
use turbo_discovery::{DiscoveryError, DiscoveryScanner, ScanDiff};
use turbo_engine::EngineGate;

/// Capacity of the scheduler inbox
const EVENT_CAPACITY: usize = 256;

/// Everything the control loop reacts to
#[derive(Debug)]
pub enum SchedulerEvent {
    /// Periodic scan timer fired
    Tick,

    /// A discovery pass finished; `enqueue` asks for scheduled jobs afterwards
    ScanCompleted {
        result: std::result::Result<ScanDiff, DiscoveryError>,
        enqueue: bool,
    },

    /// Debounced local change for a target
    Watch(TargetId),

    /// Front-end command
    Command(Command),

    /// A job finished, with its outcome recorded
    JobCompleted(SyncJob),

    /// A retry backoff elapsed
    RetryDue { id: TargetId, generation: u64 },

    /// Some engine's health changed
    EngineChanged,

    /// Stop gracefully
    Shutdown,
}

/// Source of discovery results
#[async_trait]
pub trait TargetSource: Send + Sync {
    async fn scan(
        &self,
        known: HashSet<TargetId>,
    ) -> std::result::Result<ScanDiff, DiscoveryError>;
}

/// `TargetSource` that walks the remote tree on the blocking pool
#[derive(Debug, Clone)]
pub struct ScannerSource {
    scanner: Arc<DiscoveryScanner>,
}

impl ScannerSource {
    pub fn new(scanner: DiscoveryScanner) -> Self {
        Self {
            scanner: Arc::new(scanner),
        }
    }
}

#[async_trait]
impl TargetSource for ScannerSource {
    async fn scan(
        &self,
        known: HashSet<TargetId>,
    ) -> std::result::Result<ScanDiff, DiscoveryError> {
        let scanner = Arc::clone(&self.scanner);
        tokio::task::spawn_blocking(move || scanner.scan(&known))
            .await
            .map_err(|e| DiscoveryError::Io(std::io::Error::other(e)))?
    }
}

/// When the control loop returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Keep scheduling until shut down
    #[default]
    Continuous,

    /// Scan once, sync every target, return when nothing is outstanding
    UntilIdle,
}

/// Final state when the loop returns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,

    /// Targets whose last job did not succeed
    pub failed: Vec<TargetId>,

    /// The last discovery pass could not read the remote root
    pub scan_failed: bool,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        !self.scan_failed && self.succeeded == self.total
    }
}

/// Cloneable sender into a running scheduler
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Report a local change for `id`, as the debouncer would
    pub async fn notify_change(&self, id: TargetId) -> Result<()> {
        self.send(SchedulerEvent::Watch(id)).await
    }

    pub async fn command(&self, command: Command) -> Result<()> {
        self.send(SchedulerEvent::Command(command)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SchedulerEvent::Shutdown).await
    }

    async fn send(&self, event: SchedulerEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| SyncError::ChannelClosed("scheduler"))
    }
}

#[derive(Debug, Clone)]
struct PendingJob {
    id: TargetId,
    trigger: SyncTrigger,
    attempt: u32,
}

#[derive(Debug, Clone)]
struct RetryState {
    generation: u64,
    trigger: SyncTrigger,
    attempt: u32,
}

/// The sync scheduler
pub struct Scheduler {
    config: Arc<SyncConfig>,
    registry: TargetRegistry,
    executor: Arc<SyncExecutor>,
    source: Arc<dyn TargetSource>,
    gate: EngineGate,
    reporter: Arc<dyn StatusReporter>,
    commands: Option<Box<dyn CommandReceiver>>,
    mode: RunMode,
    os_watch: bool,

    tx: mpsc::Sender<SchedulerEvent>,
    rx: mpsc::Receiver<SchedulerEvent>,

    /// Cancels ticker, forwarders, debouncer and retry timers
    background: CancellationToken,
    /// Parent of every running job's token
    jobs: CancellationToken,

    queue: VecDeque<PendingJob>,
    running: HashSet<TargetId>,
    /// Removed while their job was running; the result belongs to no target
    orphaned: HashSet<TargetId>,
    retries: HashMap<TargetId, RetryState>,
    next_generation: u64,

    scan_in_flight: bool,
    enqueue_after_scan: bool,
    initial_scan_done: bool,
    scan_failed: bool,

    watch_enabled: bool,
    watch_available: bool,
    watcher: Option<FileWatcher>,
    index: SharedTargetIndex,

    shutting_down: bool,
    last_published: Option<StatusSnapshot>,
}

impl Scheduler {
    pub fn new(
        config: Arc<SyncConfig>,
        registry: TargetRegistry,
        executor: Arc<SyncExecutor>,
        source: Arc<dyn TargetSource>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let watch_enabled = config.watch.enabled;

        Self {
            config,
            registry,
            executor,
            source,
            gate: EngineGate::open(),
            reporter: Arc::new(turbo_core::NoopReporter),
            commands: None,
            mode: RunMode::Continuous,
            os_watch: true,
            tx,
            rx,
            background: CancellationToken::new(),
            jobs: CancellationToken::new(),
            queue: VecDeque::new(),
            running: HashSet::new(),
            orphaned: HashSet::new(),
            retries: HashMap::new(),
            next_generation: 0,
            scan_in_flight: false,
            enqueue_after_scan: false,
            initial_scan_done: false,
            scan_failed: false,
            watch_enabled,
            watch_available: false,
            watcher: None,
            index: SharedTargetIndex::default(),
            shutting_down: false,
            last_published: None,
        }
    }

    /// Hold jobs until the required engines are ready
    pub fn with_gate(mut self, gate: EngineGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_commands(mut self, commands: Box<dyn CommandReceiver>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Take watch notifications only from [`SchedulerHandle::notify_change`]
    pub fn without_os_watcher(mut self) -> Self {
        self.os_watch = false;
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    /// Run the control loop until shutdown (or until idle in `UntilIdle` mode)
    pub async fn run(mut self) -> RunSummary {
        info!(
            mode = ?self.mode,
            max_parallel = self.config.schedule.max_parallel_jobs,
            "Scheduler starting"
        );

        self.spawn_background();
        if self.watch_enabled && self.mode == RunMode::Continuous {
            self.start_watcher();
        }
        if self.mode == RunMode::UntilIdle {
            self.start_scan(true).await;
        }
        self.publish().await;

        while let Some(event) = self.rx.recv().await {
            trace!(?event, "Scheduler event");
            if matches!(event, SchedulerEvent::Shutdown)
                || matches!(event, SchedulerEvent::Command(Command::Shutdown))
            {
                info!("Shutdown requested");
                break;
            }

            self.handle_event(event).await;
            self.dispatch().await;
            self.publish().await;

            if self.mode == RunMode::UntilIdle && self.is_idle() {
                debug!("Nothing outstanding, leaving the control loop");
                break;
            }
        }

        self.shutdown().await;
        summarize(&self.registry, self.scan_failed).await
    }

    async fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::Tick => self.start_scan(true).await,
            SchedulerEvent::ScanCompleted { result, enqueue } => {
                self.scan_completed(result, enqueue).await;
            }
            SchedulerEvent::Watch(id) => {
                if self.watch_enabled {
                    self.request(id, SyncTrigger::Watch).await;
                } else {
                    trace!(target_id = %id, "Watch disabled, ignoring change");
                }
            }
            SchedulerEvent::Command(command) => self.command(command).await,
            SchedulerEvent::JobCompleted(job) => self.job_completed(job).await,
            SchedulerEvent::RetryDue { id, generation } => self.retry_due(id, generation).await,
            // Dispatch re-reads the gate after every event
            SchedulerEvent::EngineChanged | SchedulerEvent::Shutdown => {}
        }
    }

    async fn command(&mut self, command: Command) {
        match command {
            Command::TriggerSync {
                scope: TriggerScope::All,
            } => {
                info!("Manual sync of all targets");
                let targets = self.registry.snapshot().await;
                for target in targets {
                    self.request(target.id, SyncTrigger::Manual).await;
                }
            }
            Command::TriggerSync {
                scope: TriggerScope::Target(id),
            } => {
                if self.registry.contains(&id).await {
                    info!(target_id = %id, "Manual sync");
                    self.request(id, SyncTrigger::Manual).await;
                } else {
                    warn!(target_id = %id, "Manual sync requested for unknown target, ignoring");
                }
            }
            Command::ToggleWatch { enabled } => {
                info!(enabled, "File watching toggled");
                self.watch_enabled = enabled;
                if enabled && self.watcher.is_none() {
                    self.start_watcher();
                }
            }
            Command::Rescan => self.start_scan(false).await,
            Command::Shutdown => {}
        }
    }

    async fn start_scan(&mut self, enqueue: bool) {
        if self.scan_in_flight {
            debug!("Discovery already running, folding request into it");
            self.enqueue_after_scan |= enqueue;
            return;
        }
        self.scan_in_flight = true;

        let known = self.registry.ids().await;
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = source.scan(known).await;
            let _ = tx.send(SchedulerEvent::ScanCompleted { result, enqueue }).await;
        });
    }

    async fn scan_completed(
        &mut self,
        result: std::result::Result<ScanDiff, DiscoveryError>,
        enqueue: bool,
    ) {
        self.scan_in_flight = false;
        self.initial_scan_done = true;
        let enqueue = enqueue || std::mem::take(&mut self.enqueue_after_scan);

        let diff = match result {
            Ok(diff) => {
                self.scan_failed = false;
                diff
            }
            Err(e) => {
                // Never treat an unreadable root as "every marker removed"
                warn!("Discovery failed, keeping current targets: {}", e);
                self.scan_failed = true;
                return;
            }
        };

        if !diff.removed.is_empty() {
            let removed: HashSet<TargetId> = diff.removed.iter().cloned().collect();
            self.queue.retain(|job| !removed.contains(&job.id));
            self.retries.retain(|id, _| !removed.contains(id));
            for id in &diff.removed {
                info!(target_id = %id, "Target removed");
                if self.running.contains(id) {
                    self.orphaned.insert(id.clone());
                }
            }
            if let Err(e) = self.registry.apply(RegistryUpdate::Removed(diff.removed)).await {
                warn!("Failed to remove targets: {}", e);
            }
        }

        if !diff.added.is_empty() {
            for target in &diff.added {
                info!(target_id = %target.id, "Target added");
            }
            if let Err(e) = self.registry.apply(RegistryUpdate::Discovered(diff.added)).await {
                warn!("Failed to register targets: {}", e);
            }
        }

        let targets = self.registry.snapshot().await;
        self.index.replace(TargetIndex::new(&targets));

        if enqueue {
            for id in self.registry.idle_ids().await {
                self.request(id, SyncTrigger::Scheduled).await;
            }
        }
    }

    /// Accept or drop a sync request according to the target's state
    async fn request(&mut self, id: TargetId, trigger: SyncTrigger) {
        if self.shutting_down {
            return;
        }

        let Some(target) = self.registry.get(&id).await else {
            debug!(target_id = %id, %trigger, "Request for unknown target dropped");
            return;
        };

        match target.state {
            TargetState::Idle => self.enqueue(id, trigger, 1).await,
            TargetState::Retrying if trigger == SyncTrigger::Manual => {
                debug!(target_id = %id, "Manual trigger resets retry backoff");
                self.retries.remove(&id);
                self.enqueue(id, trigger, 1).await;
            }
            state => {
                trace!(target_id = %id, %trigger, %state, "Already outstanding, dropping request");
            }
        }
    }

    async fn enqueue(&mut self, id: TargetId, trigger: SyncTrigger, attempt: u32) {
        match self
            .registry
            .apply(RegistryUpdate::Queued { id: id.clone() })
            .await
        {
            Ok(_) => {
                debug!(target_id = %id, %trigger, attempt, "Queued");
                self.queue.push_back(PendingJob {
                    id,
                    trigger,
                    attempt,
                });
            }
            Err(e) => warn!(target_id = %id, "Cannot queue: {}", e),
        }
    }

    /// Start queued jobs while slots are free and engines allow it
    async fn dispatch(&mut self) {
        if self.queue.is_empty() || self.shutting_down {
            return;
        }

        match self.gate.readiness() {
            EngineReadiness::Starting => {
                trace!(queued = self.queue.len(), "Engines not ready, holding jobs");
            }
            EngineReadiness::Degraded => self.abandon_queued().await,
            EngineReadiness::Ready => {
                let slots = self.config.schedule.max_parallel_jobs;
                let mut deferred = VecDeque::new();
                while self.running.len() < slots {
                    let Some(pending) = self.queue.pop_front() else {
                        break;
                    };
                    // A re-added target waits for the job of its removed predecessor
                    if self.running.contains(&pending.id) {
                        deferred.push_back(pending);
                        continue;
                    }
                    self.start_job(pending).await;
                }
                deferred.append(&mut self.queue);
                self.queue = deferred;
            }
        }
    }

    async fn start_job(&mut self, pending: PendingJob) {
        let Some(target) = self.registry.get(&pending.id).await else {
            return;
        };

        let started = self
            .registry
            .apply(RegistryUpdate::Started {
                id: pending.id.clone(),
                attempt: pending.attempt,
            })
            .await;
        if let Err(e) = started {
            warn!(target_id = %pending.id, "Cannot start job: {}", e);
            return;
        }

        let token = self.jobs.child_token();
        self.running.insert(pending.id.clone());

        let job = SyncJob::new(pending.id, pending.trigger, pending.attempt);
        let executor = Arc::clone(&self.executor);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let job = executor.run(job, &target, token).await;
            let _ = tx.send(SchedulerEvent::JobCompleted(job)).await;
        });
    }

    async fn abandon_queued(&mut self) {
        let roles: Vec<String> = self
            .gate
            .degraded_roles()
            .iter()
            .map(ToString::to_string)
            .collect();
        let message = format!("sync engine unavailable: {} degraded", roles.join(", "));

        for pending in std::mem::take(&mut self.queue) {
            warn!(target_id = %pending.id, "{}", message);
            let update = RegistryUpdate::Abandoned {
                id: pending.id.clone(),
                kind: FailureKind::EngineUnavailable,
                message: message.clone(),
            };
            if let Err(e) = self.registry.apply(update).await {
                warn!(target_id = %pending.id, "Cannot abandon job: {}", e);
            }
        }
    }

    async fn job_completed(&mut self, job: SyncJob) {
        let id = job.target_id.clone();
        self.running.remove(&id);

        if self.orphaned.remove(&id) || !self.registry.contains(&id).await {
            debug!(target_id = %id, "Job finished for a removed target, ignoring result");
            return;
        }

        let retryable = job
            .outcome
            .as_ref()
            .and_then(|outcome| outcome.failure_kind())
            .is_some_and(|kind| kind.is_retryable());
        let retry = retryable
            && !self.shutting_down
            && job.attempt <= self.config.schedule.max_retries;

        if retryable && !retry && !self.shutting_down {
            warn!(target_id = %id, attempts = job.attempt, "Giving up until the next trigger");
        }

        let attempt = job.attempt;
        let trigger = job.trigger;
        if let Err(e) = self
            .registry
            .apply(RegistryUpdate::Finished { job, retry })
            .await
        {
            warn!(target_id = %id, "Cannot record job result: {}", e);
            return;
        }

        if retry {
            self.schedule_retry(id, trigger, attempt);
        }
    }

    fn schedule_retry(&mut self, id: TargetId, trigger: SyncTrigger, attempt: u32) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = self.config.schedule.retry_delay(attempt);

        info!(target_id = %id, attempt, "Retrying in {:?}", delay);
        self.retries.insert(
            id.clone(),
            RetryState {
                generation,
                trigger,
                attempt: attempt + 1,
            },
        );

        let tx = self.tx.clone();
        let cancel = self.background.child_token();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(SchedulerEvent::RetryDue { id, generation }).await;
                }
            }
        });
    }

    async fn retry_due(&mut self, id: TargetId, generation: u64) {
        let current = self.retries.get(&id).map(|retry| retry.generation);
        if current != Some(generation) {
            trace!(target_id = %id, "Stale retry timer");
            return;
        }
        let Some(retry) = self.retries.remove(&id) else {
            return;
        };
        self.enqueue(id, retry.trigger, retry.attempt).await;
    }

    fn is_idle(&self) -> bool {
        self.initial_scan_done
            && !self.scan_in_flight
            && self.queue.is_empty()
            && self.running.is_empty()
            && self.retries.is_empty()
    }

    fn spawn_background(&mut self) {
        if self.mode == RunMode::Continuous {
            let tx = self.tx.clone();
            let cancel = self.background.child_token();
            let period = self.config.schedule.scan_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if tx.send(SchedulerEvent::Tick).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        if let Some(mut commands) = self.commands.take() {
            let tx = self.tx.clone();
            let cancel = self.background.child_token();
            tokio::spawn(async move {
                loop {
                    let command = tokio::select! {
                        () = cancel.cancelled() => break,
                        command = commands.recv_command() => command,
                    };
                    let Some(command) = command else {
                        debug!("Command source closed");
                        break;
                    };
                    if tx.send(SchedulerEvent::Command(command)).await.is_err() {
                        break;
                    }
                }
            });
        }

        for rx in self.gate.receivers() {
            let mut rx = rx.clone();
            let tx = self.tx.clone();
            let cancel = self.background.child_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        changed = rx.changed() => {
                            if changed.is_err() || tx.send(SchedulerEvent::EngineChanged).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    }

    fn start_watcher(&mut self) {
        if !self.os_watch {
            self.watch_available = true;
            return;
        }

        match FileWatcher::start(&self.config.paths.local_root) {
            Ok((watcher, raw)) => {
                tokio::spawn(run_debouncer(
                    raw,
                    self.index.clone(),
                    self.config.watch.debounce(),
                    self.tx.clone(),
                    self.background.child_token(),
                ));
                self.watcher = Some(watcher);
                self.watch_available = true;
            }
            Err(e) => {
                warn!("File watching unavailable, continuing timer-only: {}", e);
                self.watch_available = false;
            }
        }
    }

    async fn shutdown(&mut self) {
        self.shutting_down = true;
        self.background.cancel();

        let dropped = self.queue.len();
        self.queue.clear();
        self.retries.clear();
        if dropped > 0 {
            info!(dropped, "Dropped queued jobs");
        }

        if !self.running.is_empty() {
            info!(running = self.running.len(), "Stopping running jobs");
            self.jobs.cancel();

            let deadline = Instant::now() + self.config.schedule.shutdown_grace();
            while !self.running.is_empty() {
                match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(Some(SchedulerEvent::JobCompleted(job))) => self.job_completed(job).await,
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => {
                        warn!(
                            running = self.running.len(),
                            "Jobs still running after shutdown grace"
                        );
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.registry.apply(RegistryUpdate::Flush).await {
            warn!("Failed to flush registry: {}", e);
        }
        self.watcher = None;
        self.watch_available = false;
        self.publish().await;
        info!("Scheduler stopped");
    }

    async fn publish(&mut self) {
        let snapshot = StatusSnapshot {
            targets: self.registry.snapshot().await,
            engines: self.gate.snapshot(),
            watch_enabled: self.watch_enabled,
            watch_available: self.watch_available,
            taken_at: Utc::now(),
        };

        let unchanged = self.last_published.as_ref().is_some_and(|last| {
            last.targets == snapshot.targets
                && last.engines == snapshot.engines
                && last.watch_enabled == snapshot.watch_enabled
                && last.watch_available == snapshot.watch_available
        });
        if unchanged {
            return;
        }

        self.reporter.report(&snapshot);
        self.last_published = Some(snapshot);
    }
}

async fn summarize(registry: &TargetRegistry, scan_failed: bool) -> RunSummary {
    let targets = registry.snapshot().await;
    let succeeded = targets
        .iter()
        .filter(|t| t.last_status == SyncStatus::Succeeded)
        .count();
    let failed = targets
        .iter()
        .filter(|t| t.last_status != SyncStatus::Succeeded)
        .map(|t| t.id.clone())
        .collect();

    RunSummary {
        total: targets.len(),
        succeeded,
        failed,
        scan_failed,
    }
}
