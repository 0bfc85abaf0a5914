//! File Watch Debouncer
//!
//! Raw OS change events under the local root are mapped to the owning target
//! (longest matching `local_path` prefix) and coalesced per target: a target
//! is reported once its events have been quiet for the debounce delay.
//!
//! # Platform Support
//!
//! - Windows: `ReadDirectoryChangesW`
//! - macOS: `FSEvents`
//! - Linux: `inotify`

use crate::error::{Result, SyncError};
use crate::scheduler::SchedulerEvent;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use turbo_core::{SyncTarget, TargetId};

/// Capacity of the raw path channel between the OS watcher and the debouncer
const RAW_EVENT_CAPACITY: usize = 1024;

/// Maps local paths to the target that owns them
#[derive(Debug, Clone, Default)]
pub struct TargetIndex {
    /// Sorted so that deeper (longer) paths come first
    entries: Vec<(PathBuf, TargetId)>,
}

impl TargetIndex {
    pub fn new<'a>(targets: impl IntoIterator<Item = &'a SyncTarget>) -> Self {
        let mut entries = Vec::new();
        for target in targets {
            entries.push((target.local_path.clone(), target.id.clone()));
            // FSEvents reports resolved paths (e.g. /private/var for /var)
            if let Ok(canonical) = std::fs::canonicalize(&target.local_path) {
                if canonical != target.local_path {
                    entries.push((canonical, target.id.clone()));
                }
            }
        }
        entries.sort_by(|(a, _), (b, _)| b.components().count().cmp(&a.components().count()));
        Self { entries }
    }

    /// Target owning `path`, by longest matching local path
    pub fn resolve(&self, path: &Path) -> Option<TargetId> {
        self.entries
            .iter()
            .find(|(local, _)| path.starts_with(local))
            .map(|(_, id)| id.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Index shared between the scheduler (writer) and the debouncer task (reader)
#[derive(Debug, Clone, Default)]
pub struct SharedTargetIndex(Arc<RwLock<TargetIndex>>);

impl SharedTargetIndex {
    pub fn replace(&self, index: TargetIndex) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = index;
    }

    pub fn resolve(&self, path: &Path) -> Option<TargetId> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(path)
    }
}

/// Per-target trailing-edge debounce
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadlines: HashMap<TargetId, Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadlines: HashMap::new(),
        }
    }

    /// Record an event for `id` at `now`, pushing its deadline out
    pub fn record(&mut self, id: TargetId, now: Instant) {
        self.deadlines.insert(id, now + self.delay);
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Targets whose quiet period has elapsed at `now`, ordered by id
    pub fn take_due(&mut self, now: Instant) -> Vec<TargetId> {
        let mut due: Vec<TargetId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        for id in &due {
            self.deadlines.remove(id);
        }
        due
    }

    pub fn pending(&self) -> usize {
        self.deadlines.len()
    }
}

/// OS-level recursive watch of the local root
pub struct FileWatcher {
    root: PathBuf,
    // Dropping the watcher stops the OS subscription
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch `root` recursively, sending every changed path to the returned receiver
    ///
    /// The root is created first if it does not exist.
    pub fn start(root: &Path) -> Result<(Self, mpsc::Receiver<PathBuf>)> {
        std::fs::create_dir_all(root).map_err(|e| {
            SyncError::Watch(format!("cannot create {}: {}", root.display(), e))
        })?;

        let (tx, rx) = mpsc::channel(RAW_EVENT_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    for path in event.paths {
                        if tx.blocking_send(path).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!("Watcher error: {}", e),
            }
        })?;

        watcher.watch(root, RecursiveMode::Recursive)?;
        info!("Watching {} for local changes", root.display());

        Ok((
            Self {
                root: root.to_path_buf(),
                _watcher: watcher,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Debounce raw paths into `SchedulerEvent::Watch` notifications
///
/// Runs until cancelled or until either channel closes.
pub async fn run_debouncer(
    mut raw: mpsc::Receiver<PathBuf>,
    index: SharedTargetIndex,
    delay: Duration,
    events: mpsc::Sender<SchedulerEvent>,
    cancel: CancellationToken,
) {
    let mut debouncer = Debouncer::new(delay);

    loop {
        let deadline = debouncer.next_deadline();

        tokio::select! {
            () = cancel.cancelled() => break,
            received = raw.recv() => match received {
                Some(path) => match index.resolve(&path) {
                    Some(id) => {
                        trace!(target_id = %id, "Change in {}", path.display());
                        debouncer.record(id, Instant::now());
                    }
                    None => trace!("Change outside any target: {}", path.display()),
                },
                None => break,
            },
            () = sleep_until(deadline) => {
                for id in debouncer.take_due(Instant::now()) {
                    debug!(target_id = %id, "Local changes settled");
                    if events.send(SchedulerEvent::Watch(id)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    debug!(pending = debouncer.pending(), "Debouncer stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
