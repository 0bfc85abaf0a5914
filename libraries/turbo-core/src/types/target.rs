//! Sync target types
//!
//! A sync target is one remote directory carrying a marker file, paired with
//! its local counterpart. The registry owns these; everything else refers to
//! them by `TargetId`.

use super::ids::TargetId;
use super::job::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Last known result of syncing a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Never synced since discovery
    #[default]
    Never,
    /// Last job succeeded
    Succeeded,
    /// Last job failed
    Failed,
    /// A job is currently running
    Running,
}

impl SyncStatus {
    /// Convert to string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Running => "running",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scheduler state of a target
///
/// `Idle` covers both "succeeded" and "failed"; `SyncStatus` carries which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// Nothing outstanding
    #[default]
    Idle,
    /// Admitted, waiting for a worker slot
    Queued,
    /// A job is running
    Running,
    /// Waiting on a retry backoff timer
    Retrying,
}

impl TargetState {
    /// Convert to string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Retrying => "retrying",
        }
    }

    /// Whether a job is queued, running or waiting to be retried
    #[must_use]
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One directory pair to mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    /// Stable key derived from the path under the remote root
    pub id: TargetId,

    /// Absolute path of the directory under the remote root
    pub remote_path: PathBuf,

    /// Absolute path of the local counterpart
    pub local_path: PathBuf,

    /// Whether the marker file was present on the last scan
    pub marker_present: bool,

    /// When the last successful job finished
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Last known result
    pub last_status: SyncStatus,

    /// Set while a job for this target is running
    pub running: bool,

    /// Scheduler state
    pub state: TargetState,

    /// Classification of the last failure, cleared on success
    pub last_failure: Option<FailureKind>,

    /// Human readable detail of the last outcome
    pub last_message: Option<String>,

    /// Attempt number of the current or last job (1-based, 0 before the first job)
    pub attempt: u32,
}

impl SyncTarget {
    /// Create a freshly discovered target
    pub fn new(id: TargetId, remote_path: PathBuf, local_path: PathBuf) -> Self {
        Self {
            id,
            remote_path,
            local_path,
            marker_present: true,
            last_sync_at: None,
            last_status: SyncStatus::Never,
            running: false,
            state: TargetState::Idle,
            last_failure: None,
            last_message: None,
            attempt: 0,
        }
    }

    /// Whether the target sits in `Idle` after a failed job
    #[must_use]
    pub fn is_idle_failed(&self) -> bool {
        self.state == TargetState::Idle && self.last_status == SyncStatus::Failed
    }
}
