//! TurboSync Discovery
//!
//! Finds sync targets by walking the mounted remote tree for marker files and
//! diffs the result against the ids the registry already knows.
//!
//! # Architecture
//!
//! - `scanner`: `DiscoveryScanner`, the marker walk and local path derivation
//! - `error`: `DiscoveryError` for whole-scan failures (per-directory problems
//!   are logged and skipped instead)

mod error;
pub mod scanner;

pub use error::DiscoveryError;
pub use scanner::{DiscoveryScanner, ScanDiff};

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, DiscoveryError>;
