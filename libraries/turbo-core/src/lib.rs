//! TurboSync Core
//!
//! Platform-agnostic types, configuration and status interfaces shared by the
//! TurboSync orchestration crates.
//!
//! # Architecture
//!
//! The core crate defines:
//! - **Domain Types**: `SyncTarget`, `SyncJob`, `EngineHealth` and their state enums
//! - **Configuration**: the immutable `SyncConfig` snapshot handed to every component
//! - **Status Interfaces**: `StatusReporter` and `CommandReceiver`, the only seams a
//!   front-end talks to
//! - **Error Handling**: the unified `TurboError` taxonomy and `Result` alias
//!
//! # Example
//!
//! ```rust
//! use std::path::{Path, PathBuf};
//! use turbo_core::types::{SyncStatus, SyncTarget, TargetId};
//!
//! let id = TargetId::from_relative(Path::new("clients/acme"));
//! let target = SyncTarget::new(
//!     id.clone(),
//!     PathBuf::from("/Volumes/work/clients/acme"),
//!     PathBuf::from("/Users/me/work/clients/acme"),
//! );
//!
//! assert_eq!(id.as_str(), "clients/acme");
//! assert_eq!(target.last_status, SyncStatus::Never);
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod status;
pub mod types;

// Re-export commonly used types
pub use config::SyncConfig;
pub use error::{Result, TurboError};
pub use status::{
    Command, CommandReceiver, NoopReporter, StatusReporter, StatusSnapshot, TriggerScope,
};
pub use types::{
    EngineHealth, EngineReadiness, EngineRole, FailureKind, JobOutcome, SyncJob, SyncStatus,
    SyncTarget, SyncTrigger, TargetId, TargetState,
};
