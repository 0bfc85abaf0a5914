//! Engine instance types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Role of a long-lived backend engine instance
///
/// Two instances run side by side, one per role, each with its own API address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineRole {
    Source,
    Destination,
}

impl EngineRole {
    /// Convert to string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

impl FromStr for EngineRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "source" => Ok(Self::Source),
            "destination" | "dest" => Ok(Self::Destination),
            other => Err(format!("unknown engine role: {}", other)),
        }
    }
}

impl std::fmt::Display for EngineRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Readiness of a role as seen by the executor gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineReadiness {
    /// Last health check passed
    Ready,
    /// Launching, restarting or between failing checks
    Starting,
    /// Restart budget exhausted
    Degraded,
}

/// Health view of one engine instance
///
/// The coordinator is the only writer; everyone else reads snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineHealth {
    /// Role this instance serves
    pub role: EngineRole,

    /// Local API / GUI listener address (host:port)
    pub api_address: String,

    /// OS process id of the current instance, if running
    pub pid: Option<u32>,

    /// Whether the last health check passed
    pub healthy: bool,

    /// Number of restarts performed so far
    pub restart_count: u32,

    /// Failed health checks since the last success
    pub consecutive_failures: u32,

    /// Restart budget exhausted; the role will not be relaunched
    pub degraded: bool,

    /// Time of the last health check
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Last probe or launch error
    pub last_error: Option<String>,
}

impl EngineHealth {
    /// Initial health of an instance that has not been launched yet
    pub fn starting(role: EngineRole, api_address: impl Into<String>) -> Self {
        Self {
            role,
            api_address: api_address.into(),
            pid: None,
            healthy: false,
            restart_count: 0,
            consecutive_failures: 0,
            degraded: false,
            last_checked_at: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn readiness(&self) -> EngineReadiness {
        if self.degraded {
            EngineReadiness::Degraded
        } else if self.healthy {
            EngineReadiness::Ready
        } else {
            EngineReadiness::Starting
        }
    }
}
