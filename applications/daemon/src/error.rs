/// Daemon error types
use thiserror::Error;
use turbo_core::{EngineRole, TurboError};

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("All sync engines are degraded: {}", format_roles(.0))]
    EnginesDegraded(Vec<EngineRole>),

    #[error("{0} dependency check(s) failed")]
    ChecksFailed(usize),

    #[error(transparent)]
    Turbo(#[from] TurboError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            DaemonError::Config(_) | DaemonError::Turbo(TurboError::Config(_)) => 2,
            DaemonError::EnginesDegraded(_) => 3,
            _ => 1,
        }
    }
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Exit code for any top-level error
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<DaemonError>()
        .map(DaemonError::exit_code)
        .or_else(|| {
            err.downcast_ref::<TurboError>()
                .map(|e| if matches!(e, TurboError::Config(_)) { 2 } else { 1 })
        })
        .unwrap_or(1)
}

fn format_roles(roles: &[EngineRole]) -> String {
    roles
        .iter()
        .map(EngineRole::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
