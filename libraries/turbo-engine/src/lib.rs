//! TurboSync Engine Coordinator
//!
//! Starts, health-checks and restarts the long-lived backend sync engine
//! instances (one per role) that sync jobs depend on.
//!
//! # Features
//!
//! - **Launching**: role-specific arguments, own process group, graceful stop
//! - **Health checks**: HTTP probe of the engine's local status endpoint
//! - **Restarts**: exponential backoff with a restart budget, then degraded
//! - **Readiness**: `ensure_ready` for startup and an `EngineGate` for dispatch
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use turbo_engine::{EngineCoordinator, HttpHealthProbe, ProcessLauncher};
//!
//! let coordinator = EngineCoordinator::start(
//!     &config.engines,
//!     Arc::new(ProcessLauncher::new()),
//!     Arc::new(HttpHealthProbe::new()?),
//! );
//!
//! for (role, result) in coordinator.ensure_all_ready().await {
//!     println!("{role}: {:?}", result);
//! }
//!
//! coordinator.shutdown().await;
//! ```

mod coordinator;
mod error;
mod launcher;
mod policy;
mod probe;
pub mod process;

pub use coordinator::{EngineCoordinator, EngineGate};
pub use error::{EngineError, Result};
pub use launcher::{launch_args, EngineLauncher, EngineProcess, ProcessLauncher, ENGINE_STOP_GRACE};
pub use policy::RestartPolicy;
pub use probe::{HealthProbe, HttpHealthProbe};
