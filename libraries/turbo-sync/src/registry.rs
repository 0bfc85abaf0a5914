//! Sync Target Registry
//!
//! The registry exclusively owns every `SyncTarget`. All writes go through
//! [`TargetRegistry::apply`], which takes the write lock once per update and
//! checks the state machine, so discovery results, scheduler transitions and
//! job results can never interleave on the same target.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use turbo_core::{
    FailureKind, JobOutcome, SyncJob, SyncStatus, SyncTarget, TargetId, TargetState, TurboError,
};

/// One serialized change to the registry
#[derive(Debug, Clone)]
pub enum RegistryUpdate {
    /// Newly discovered targets; ids already present are left untouched
    Discovered(Vec<SyncTarget>),

    /// Targets whose marker disappeared
    Removed(Vec<TargetId>),

    /// `Idle | Retrying -> Queued`
    Queued { id: TargetId },

    /// `Queued -> Running`
    Started { id: TargetId, attempt: u32 },

    /// `Running -> Idle` or `Running -> Retrying` with the job's result
    Finished { job: SyncJob, retry: bool },

    /// `Queued | Retrying -> Idle(failed)` without running
    Abandoned {
        id: TargetId,
        kind: FailureKind,
        message: String,
    },

    /// Shutdown: nothing is left `Running`, `Queued` or `Retrying`
    Flush,
}

/// What an update changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateEffect {
    /// Ids added or removed by the update
    pub changed: Vec<TargetId>,
}

/// Shared, serialized store of sync targets
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    inner: Arc<RwLock<BTreeMap<TargetId, SyncTarget>>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update atomically
    pub async fn apply(&self, update: RegistryUpdate) -> Result<UpdateEffect, TurboError> {
        let mut targets = self.inner.write().await;
        apply_locked(&mut targets, update)
    }

    pub async fn get(&self, id: &TargetId) -> Option<SyncTarget> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &TargetId) -> bool {
        self.inner.read().await.contains_key(id)
    }

    pub async fn ids(&self) -> HashSet<TargetId> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// All targets ordered by id
    pub async fn snapshot(&self) -> Vec<SyncTarget> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Ids of targets in `Idle`, ordered by id
    pub async fn idle_ids(&self) -> Vec<TargetId> {
        self.inner
            .read()
            .await
            .values()
            .filter(|t| t.state == TargetState::Idle)
            .map(|t| t.id.clone())
            .collect()
    }

    pub async fn running_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|t| t.running)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

fn apply_locked(
    targets: &mut BTreeMap<TargetId, SyncTarget>,
    update: RegistryUpdate,
) -> Result<UpdateEffect, TurboError> {
    let mut effect = UpdateEffect::default();

    match update {
        RegistryUpdate::Discovered(found) => {
            for target in found {
                if !targets.contains_key(&target.id) {
                    effect.changed.push(target.id.clone());
                    targets.insert(target.id.clone(), target);
                }
            }
        }

        RegistryUpdate::Removed(ids) => {
            for id in ids {
                if targets.remove(&id).is_some() {
                    effect.changed.push(id);
                }
            }
        }

        RegistryUpdate::Queued { id } => {
            let target = lookup(targets, &id)?;
            transition(target, &[TargetState::Idle, TargetState::Retrying], TargetState::Queued)?;
        }

        RegistryUpdate::Started { id, attempt } => {
            let target = lookup(targets, &id)?;
            transition(target, &[TargetState::Queued], TargetState::Running)?;
            target.running = true;
            target.last_status = SyncStatus::Running;
            target.attempt = attempt;
        }

        RegistryUpdate::Finished { job, retry } => {
            let target = lookup(targets, &job.target_id)?;
            let next = if retry {
                TargetState::Retrying
            } else {
                TargetState::Idle
            };
            transition(target, &[TargetState::Running], next)?;
            target.running = false;
            target.attempt = job.attempt;

            match job.outcome {
                Some(JobOutcome::Succeeded) => {
                    target.last_status = SyncStatus::Succeeded;
                    target.last_sync_at = Some(job.ended_at.unwrap_or_else(Utc::now));
                    target.last_failure = None;
                    target.last_message = None;
                }
                Some(JobOutcome::Failed { kind, message }) => {
                    target.last_status = SyncStatus::Failed;
                    target.last_failure = Some(kind);
                    target.last_message = Some(message);
                }
                None => {
                    target.last_status = SyncStatus::Failed;
                    target.last_failure = Some(FailureKind::Cancelled);
                    target.last_message = Some("job ended without an outcome".to_string());
                }
            }
        }

        RegistryUpdate::Abandoned { id, kind, message } => {
            let target = lookup(targets, &id)?;
            transition(
                target,
                &[TargetState::Queued, TargetState::Retrying],
                TargetState::Idle,
            )?;
            target.last_status = SyncStatus::Failed;
            target.last_failure = Some(kind);
            target.last_message = Some(message);
        }

        RegistryUpdate::Flush => {
            for target in targets.values_mut() {
                if target.running || target.state == TargetState::Running {
                    target.running = false;
                    target.last_status = SyncStatus::Failed;
                    target.last_failure = Some(FailureKind::Cancelled);
                    target.last_message = Some("interrupted by shutdown".to_string());
                }
                target.state = TargetState::Idle;
            }
        }
    }

    Ok(effect)
}

fn lookup<'a>(
    targets: &'a mut BTreeMap<TargetId, SyncTarget>,
    id: &TargetId,
) -> Result<&'a mut SyncTarget, TurboError> {
    targets
        .get_mut(id)
        .ok_or_else(|| TurboError::TargetNotFound(id.clone()))
}

fn transition(
    target: &mut SyncTarget,
    allowed_from: &[TargetState],
    to: TargetState,
) -> Result<(), TurboError> {
    if !allowed_from.contains(&target.state) {
        return Err(TurboError::InvalidTransition {
            target: target.id.clone(),
            from: target.state,
            to,
        });
    }
    target.state = to;
    Ok(())
}
