//! TurboSync Scheduling
//!
//! The runtime half of TurboSync: the target registry, the local file watch
//! debouncer, the scheduler control loop and the executor that runs the sync
//! engine for one target at a time.
//!
//! # Architecture
//!
//! - `registry`: `TargetRegistry`, the only mutable shared state; every
//!   change is a `RegistryUpdate` applied under one lock
//! - `watcher`: OS file watching, target resolution and per-target debounce
//! - `scheduler`: the single-inbox control loop (ticks, watch events,
//!   commands, job completions, retries, engine health)
//! - `executor`: one job end to end, including resync recovery and exit code
//!   classification
//! - `supervisor`: spawn, output streaming, timeout and kill of a subprocess
//! - `command`: argument list construction from the configured template
//! - `reporter`: `watch` channel status feed adapter
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use turbo_core::SyncConfig;
//! use turbo_discovery::DiscoveryScanner;
//! use turbo_sync::{Scheduler, ScannerSource, SyncExecutor, TargetRegistry, TokioSupervisor};
//!
//! # async fn example() {
//! let config = Arc::new(SyncConfig::new("/Volumes/work", "/home/me/work"));
//! let executor = SyncExecutor::new(Arc::clone(&config), Arc::new(TokioSupervisor::new()));
//! let source = ScannerSource::new(DiscoveryScanner::from_settings(&config.paths));
//!
//! let scheduler = Scheduler::new(config, TargetRegistry::new(), Arc::new(executor), Arc::new(source));
//! let handle = scheduler.handle();
//! let summary = tokio::spawn(scheduler.run());
//!
//! handle.shutdown().await.ok();
//! let _ = summary.await;
//! # }
//! ```

pub mod command;
mod error;
pub mod executor;
pub mod registry;
pub mod reporter;
pub mod scheduler;
pub mod supervisor;
pub mod watcher;

pub use command::{split_options, Invocation};
pub use error::{Result, SyncError};
pub use executor::SyncExecutor;
pub use registry::{RegistryUpdate, TargetRegistry};
pub use reporter::WatchStatusReporter;
pub use scheduler::{
    RunMode, RunSummary, ScannerSource, Scheduler, SchedulerEvent, SchedulerHandle, TargetSource,
};
pub use supervisor::{ProcessExit, ProcessReport, ProcessSpec, ProcessSupervisor, TokioSupervisor};
