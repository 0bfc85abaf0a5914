mod engine;
mod ids;
mod job;
mod target;

pub use engine::{EngineHealth, EngineReadiness, EngineRole};
pub use ids::TargetId;
pub use job::{FailureKind, JobOutcome, SyncJob, SyncTrigger};
pub use target::{SyncStatus, SyncTarget, TargetState};
