/// Core error types for TurboSync
use crate::types::{EngineRole, TargetId, TargetState};
use thiserror::Error;

/// Result type alias using `TurboError`
pub type Result<T> = std::result::Result<T, TurboError>;

/// Core error taxonomy for TurboSync
///
/// Only `Config` and a fully degraded `EngineUnavailable` are process-fatal;
/// everything else is local to one target's state machine.
#[derive(Error, Debug)]
pub enum TurboError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A directory could not be inspected during discovery
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// An engine role is not available
    #[error("Engine unavailable ({role}): {message}")]
    EngineUnavailable { role: EngineRole, message: String },

    /// Filesystem watching could not be set up
    #[error("Watch unavailable: {0}")]
    WatchUnavailable(String),

    /// Job failed in a way that may succeed on retry
    #[error("Transient job failure for {target}: {message}")]
    JobTransient { target: TargetId, message: String },

    /// Job failed in a way that will not succeed on retry
    #[error("Fatal job failure for {target}: {message}")]
    JobFatal { target: TargetId, message: String },

    /// An operation exceeded its time budget
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Target not in the registry
    #[error("Target not found: {0}")]
    TargetNotFound(TargetId),

    /// State machine transition that is not allowed
    #[error("Invalid transition for {target}: {from} -> {to}")]
    InvalidTransition {
        target: TargetId,
        from: TargetState,
        to: TargetState,
    },

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl TurboError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create an engine unavailable error
    pub fn engine_unavailable(role: EngineRole, msg: impl Into<String>) -> Self {
        Self::EngineUnavailable {
            role,
            message: msg.into(),
        }
    }

    /// Create a watch unavailable error
    pub fn watch_unavailable(msg: impl Into<String>) -> Self {
        Self::WatchUnavailable(msg.into())
    }

    /// Whether this error should stop the process at startup
    #[must_use]
    pub fn is_process_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::EngineUnavailable { .. })
    }

    /// Whether this error is eligible for the per-target retry path
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::JobTransient { .. } | Self::Timeout { .. })
    }
}
