//! Sync job types

use super::ids::TargetId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What caused a job to be admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    /// Periodic scan tick
    Scheduled,
    /// Debounced local filesystem change
    Watch,
    /// Explicit request from the command channel
    Manual,
}

impl SyncTrigger {
    /// Convert to string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Watch => "watch",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Lock contention, flaky mount, network hiccup
    Transient,
    /// Per-job timeout was hit
    Timeout,
    /// Misconfiguration or missing path
    Fatal,
    /// A required engine role is permanently degraded
    EngineUnavailable,
    /// Cancelled by shutdown or target removal
    Cancelled,
}

impl FailureKind {
    /// Convert to string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::Fatal => "fatal",
            Self::EngineUnavailable => "engine_unavailable",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the scheduler's retry path applies
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal result of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum JobOutcome {
    Succeeded,
    Failed { kind: FailureKind, message: String },
}

impl JobOutcome {
    /// Build a failed outcome
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Failure classification, `None` on success
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Succeeded => None,
            Self::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// One execution attempt for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Target being synced
    pub target_id: TargetId,

    /// What admitted the job
    pub trigger: SyncTrigger,

    /// Attempt number, 1-based
    pub attempt: u32,

    /// Set by the executor when the subprocess is spawned
    pub started_at: Option<DateTime<Utc>>,

    /// Set by the executor when the job reaches a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Exit code of the last subprocess run, if it exited normally
    pub exit_code: Option<i32>,

    /// Terminal outcome, `None` while running
    pub outcome: Option<JobOutcome>,
}

impl SyncJob {
    /// Create a job that has not started yet
    pub fn new(target_id: TargetId, trigger: SyncTrigger, attempt: u32) -> Self {
        Self {
            target_id,
            trigger,
            attempt,
            started_at: None,
            ended_at: None,
            exit_code: None,
            outcome: None,
        }
    }

    /// Record the terminal outcome
    pub fn finish(&mut self, outcome: JobOutcome) {
        self.ended_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }
}
