//! Status feed and command channel interfaces
//!
//! The core only ever talks to a front-end through these two seams: it pushes
//! `StatusSnapshot`s into a `StatusReporter` and pulls `Command`s out of a
//! `CommandReceiver`. Concrete adapters (watch channel, log lines, stdin) live
//! outside this crate.

use crate::types::{EngineHealth, SyncTarget, TargetId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Read-only view of everything a front-end may show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// All registered targets, ordered by id
    pub targets: Vec<SyncTarget>,

    /// Health of every configured engine role
    pub engines: Vec<EngineHealth>,

    /// Whether watch events are currently acted on
    pub watch_enabled: bool,

    /// Whether the OS watch mechanism could be set up
    pub watch_available: bool,

    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Empty snapshot, used before the first scan completes
    pub fn empty() -> Self {
        Self {
            targets: Vec::new(),
            engines: Vec::new(),
            watch_enabled: false,
            watch_available: false,
            taken_at: Utc::now(),
        }
    }

    /// Look up one target by id
    pub fn target(&self, id: &TargetId) -> Option<&SyncTarget> {
        self.targets.iter().find(|target| &target.id == id)
    }

    /// Number of targets with a job running
    pub fn running_count(&self) -> usize {
        self.targets.iter().filter(|target| target.running).count()
    }
}

/// Receives status snapshots whenever something observable changes
pub trait StatusReporter: Send + Sync {
    fn report(&self, snapshot: &StatusSnapshot);
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl StatusReporter for NoopReporter {
    fn report(&self, _snapshot: &StatusSnapshot) {}
}

impl<R: StatusReporter + ?Sized> StatusReporter for std::sync::Arc<R> {
    fn report(&self, snapshot: &StatusSnapshot) {
        (**self).report(snapshot);
    }
}

/// Which targets a manual trigger applies to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerScope {
    All,
    Target(TargetId),
}

/// Commands accepted from a front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Manual sync of one target or all of them
    TriggerSync { scope: TriggerScope },
    /// Enable or disable acting on watch events
    ToggleWatch { enabled: bool },
    /// Run discovery now without enqueueing scheduled jobs
    Rescan,
    /// Stop the control loop gracefully
    Shutdown,
}

/// Source of commands for the control loop
///
/// `None` means the source is closed; the loop keeps running without it.
#[async_trait]
pub trait CommandReceiver: Send + Sync {
    async fn recv_command(&mut self) -> Option<Command>;
}

#[async_trait]
impl CommandReceiver for mpsc::Receiver<Command> {
    async fn recv_command(&mut self) -> Option<Command> {
        self.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn mpsc_receiver_yields_commands_then_none() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(Command::Rescan).await.unwrap();
        tx.send(Command::ToggleWatch { enabled: false }).await.unwrap();
        drop(tx);

        assert_eq!(rx.recv_command().await, Some(Command::Rescan));
        assert_eq!(
            rx.recv_command().await,
            Some(Command::ToggleWatch { enabled: false })
        );
        assert_eq!(rx.recv_command().await, None);
    }

    #[test]
    fn snapshot_lookup_and_running_count() {
        let mut busy = SyncTarget::new(
            TargetId::new("busy"),
            PathBuf::from("/r/busy"),
            PathBuf::from("/l/busy"),
        );
        busy.running = true;
        let idle = SyncTarget::new(
            TargetId::new("idle"),
            PathBuf::from("/r/idle"),
            PathBuf::from("/l/idle"),
        );

        let snapshot = StatusSnapshot {
            targets: vec![busy, idle],
            ..StatusSnapshot::empty()
        };

        assert_eq!(snapshot.running_count(), 1);
        assert!(snapshot.target(&TargetId::new("idle")).is_some());
        assert!(snapshot.target(&TargetId::new("gone")).is_none());
    }

    #[test]
    fn command_json_shape() {
        let json = serde_json::to_value(Command::TriggerSync {
            scope: TriggerScope::Target(TargetId::new("a/b")),
        })
        .unwrap();
        assert_eq!(json["command"], "trigger_sync");
        assert_eq!(json["scope"]["target"], "a/b");
    }
}
