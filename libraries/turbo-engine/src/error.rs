//! Error types for engine supervision.

use thiserror::Error;
use turbo_core::{EngineRole, TurboError};

/// Errors that can occur while launching or supervising an engine instance.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine process could not be started
    #[error("Failed to launch {role} engine: {message}")]
    Launch { role: EngineRole, message: String },

    /// Health endpoint answered, but not with a healthy status
    #[error("Health check failed for {role} engine: {message}")]
    HealthCheck { role: EngineRole, message: String },

    /// Engine is not reachable or not ready in time
    #[error("{role} engine unavailable: {message}")]
    Unavailable { role: EngineRole, message: String },

    /// Restart budget exhausted
    #[error("{role} engine permanently degraded after {restarts} restarts")]
    Degraded { role: EngineRole, restarts: u32 },

    /// Role not configured
    #[error("No engine configured for role {0}")]
    UnknownRole(EngineRole),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error while spawning or signalling the process
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Role the error refers to, when known
    pub fn role(&self) -> Option<EngineRole> {
        match self {
            Self::Launch { role, .. }
            | Self::HealthCheck { role, .. }
            | Self::Unavailable { role, .. }
            | Self::Degraded { role, .. } => Some(*role),
            Self::UnknownRole(role) => Some(*role),
            Self::Http(_) | Self::Io(_) => None,
        }
    }
}

impl From<EngineError> for TurboError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(io) => TurboError::Io(io),
            EngineError::UnknownRole(role) => {
                TurboError::config(format!("no engine configured for role {}", role))
            }
            EngineError::Http(http) => TurboError::Io(std::io::Error::other(http)),
            other => match other.role() {
                Some(role) => TurboError::engine_unavailable(role, other.to_string()),
                None => TurboError::Io(std::io::Error::other(other.to_string())),
            },
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
