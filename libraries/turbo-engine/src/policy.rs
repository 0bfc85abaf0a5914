//! Restart policy for engine instances.

use std::time::Duration;
use turbo_core::config::EngineSettings;

/// Exponential restart backoff with a restart budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Backoff before the first restart
    pub initial: Duration,

    /// Backoff ceiling
    pub max: Duration,

    /// Restarts allowed before the role is degraded
    pub max_restarts: u32,

    /// Consecutive failed health checks that trigger a restart
    pub failure_threshold: u32,
}

impl RestartPolicy {
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            initial: settings.backoff_initial(),
            max: settings.backoff_max(),
            max_restarts: settings.max_restarts,
            failure_threshold: settings.failure_threshold.max(1),
        }
    }

    /// Backoff before restart number `restart` (1-based): initial * 2^(restart-1), capped
    pub fn backoff_for(&self, restart: u32) -> Duration {
        let exponent = restart.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    /// Whether another restart is allowed after `restart_count` restarts
    pub fn can_restart(&self, restart_count: u32) -> bool {
        restart_count < self.max_restarts
    }

    /// Whether `consecutive_failures` warrants a restart
    pub fn should_restart(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.failure_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RestartPolicy {
        RestartPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_restarts: 5,
            failure_threshold: 3,
        }
    }

    #[test]
    fn backoff_doubles_until_ceiling() {
        let policy = policy();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(7), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn restart_budget() {
        let policy = policy();
        assert!(policy.can_restart(0));
        assert!(policy.can_restart(4));
        assert!(!policy.can_restart(5));
    }

    #[test]
    fn threshold() {
        let policy = policy();
        assert!(!policy.should_restart(2));
        assert!(policy.should_restart(3));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_bounded(
            initial_ms in 1u64..10_000,
            max_ms in 1u64..600_000,
            restart in 1u32..64,
        ) {
            let policy = RestartPolicy {
                initial: Duration::from_millis(initial_ms),
                max: Duration::from_millis(max_ms),
                max_restarts: 10,
                failure_threshold: 1,
            };

            let current = policy.backoff_for(restart);
            let next = policy.backoff_for(restart + 1);

            prop_assert!(next >= current);
            prop_assert!(current <= policy.max);
        }
    }
}
