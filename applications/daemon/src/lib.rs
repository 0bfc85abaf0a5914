//! TurboSync Daemon Library
//!
//! The `turbosync` binary: configuration loading, CLI, status output and
//! wiring of the discovery, engine and sync crates.
//!
//! This library exposes the components for testing purposes.

pub mod app;
pub mod check;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod report;

// Re-export commonly used types for convenience
pub use cli::{Cli, Commands};
pub use config::ConfigLoader;
pub use error::{exit_code_for, DaemonError, Result};
