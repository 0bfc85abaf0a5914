/// ID types for TurboSync entities
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};

/// Sync target identifier
///
/// Derived from the target's path relative to the remote root, with `/` as the
/// separator on every platform. The remote root itself is `"."`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    /// Create a target ID from an already-normalised string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the stable ID for a path relative to the remote root
    pub fn from_relative(relative: &Path) -> Self {
        let parts: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            Self(".".to_string())
        } else {
            Self(parts.join("/"))
        }
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this ID designates the remote root itself
    pub fn is_root(&self) -> bool {
        self.0 == "."
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
