use std::path::PathBuf;
use thiserror::Error;
use turbo_core::TurboError;

/// Errors that can occur during sync orchestration
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Registry error: {0}")]
    Registry(#[from] TurboError),

    #[error("Failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("Discovery error: {0}")]
    Discovery(#[from] turbo_discovery::DiscoveryError),

    #[error("Engine error: {0}")]
    Engine(#[from] turbo_engine::EngineError),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<notify::Error> for SyncError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

impl From<SyncError> for TurboError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Registry(inner) => inner,
            SyncError::Watch(msg) => TurboError::WatchUnavailable(msg),
            SyncError::Discovery(inner) => inner.into(),
            SyncError::Engine(inner) => inner.into(),
            SyncError::Io(io) => TurboError::Io(io),
            other => TurboError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
