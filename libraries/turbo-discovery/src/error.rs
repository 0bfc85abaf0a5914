//! Error types for discovery

use std::path::PathBuf;
use thiserror::Error;
use turbo_core::TurboError;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Remote root unavailable: {}", .0.display())]
    RootUnavailable(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("{} is outside the remote root {}", .path.display(), .root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DiscoveryError> for TurboError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Io(io) => TurboError::Io(io),
            other => TurboError::Discovery(other.to_string()),
        }
    }
}
