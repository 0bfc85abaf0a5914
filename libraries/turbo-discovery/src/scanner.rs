//! Marker-file scanning of the remote tree

use crate::{DiscoveryError, Result};
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use turbo_core::config::PathSettings;
use turbo_core::types::{SyncTarget, TargetId};
use walkdir::WalkDir;

/// Difference between the live marker set and the known target ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDiff {
    /// Targets whose marker is new since the last scan, ordered by id
    pub added: Vec<SyncTarget>,

    /// Known targets whose marker disappeared, ordered by id
    pub removed: Vec<TargetId>,

    /// Number of marked directories found by this scan
    pub total: usize,
}

impl ScanDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Scanner for marked directories under the remote root
#[derive(Debug, Clone)]
pub struct DiscoveryScanner {
    remote_root: PathBuf,
    local_root: PathBuf,

    /// File names that designate a directory as a sync target
    marker_names: Vec<String>,

    /// Whether to follow symbolic links
    follow_links: bool,

    /// Maximum depth of a target directory below the root
    max_depth: Option<usize>,
}

impl DiscoveryScanner {
    /// Create a scanner with the default `.livework` / `livework` markers
    pub fn new(remote_root: impl Into<PathBuf>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_root: remote_root.into(),
            local_root: local_root.into(),
            marker_names: vec![".livework".to_string(), "livework".to_string()],
            follow_links: false,
            max_depth: None,
        }
    }

    /// Build a scanner from the `paths` configuration section
    pub fn from_settings(settings: &PathSettings) -> Self {
        let mut scanner = Self::new(&settings.remote_root, &settings.local_root)
            .marker_names(settings.marker_names.clone())
            .follow_links(settings.follow_links);
        if let Some(depth) = settings.max_depth {
            scanner = scanner.max_depth(depth);
        }
        scanner
    }

    /// Replace the marker file names
    pub fn marker_names(mut self, names: Vec<String>) -> Self {
        self.marker_names = names;
        self
    }

    /// Set whether to follow symbolic links
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Set maximum depth of target directories (0 = only the root itself)
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn remote_root(&self) -> &Path {
        &self.remote_root
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Find every marked directory
    ///
    /// Unreadable subdirectories are logged and skipped. An unreadable or
    /// missing root is an error so that callers never mistake an unmounted
    /// volume for "every marker was removed".
    pub fn discover(&self) -> Result<Vec<SyncTarget>> {
        self.check_root()?;

        let mut found: BTreeMap<TargetId, SyncTarget> = BTreeMap::new();
        let mut walker = WalkDir::new(&self.remote_root).follow_links(self.follow_links);

        // The marker sits one level below the directory it marks
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth + 1);
        }

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    if e.depth() == 0 {
                        return Err(DiscoveryError::RootUnavailable(self.remote_root.clone()));
                    }
                    tracing::warn!(
                        path = ?e.path(),
                        "Skipping unreadable entry during discovery: {}",
                        e
                    );
                    continue;
                }
            };

            if entry.file_type().is_dir() || !self.is_marker(entry.file_name()) {
                continue;
            }

            let Some(dir) = entry.path().parent() else {
                continue;
            };

            let target = self.target_for(dir)?;
            if !found.contains_key(&target.id) {
                tracing::debug!(target_id = %target.id, "Found marker in {}", dir.display());
                found.insert(target.id.clone(), target);
            }
        }

        Ok(found.into_values().collect())
    }

    /// Recompute the marker set and diff it against `known`
    pub fn scan(&self, known: &HashSet<TargetId>) -> Result<ScanDiff> {
        let live = self.discover()?;
        let total = live.len();
        let live_ids: HashSet<&TargetId> = live.iter().map(|target| &target.id).collect();

        let mut removed: Vec<TargetId> = known
            .iter()
            .filter(|id| !live_ids.contains(id))
            .cloned()
            .collect();
        removed.sort();

        let added: Vec<SyncTarget> = live
            .into_iter()
            .filter(|target| !known.contains(&target.id))
            .collect();

        tracing::info!(
            total,
            added = added.len(),
            removed = removed.len(),
            "Discovery scan of {} complete",
            self.remote_root.display()
        );

        Ok(ScanDiff {
            added,
            removed,
            total,
        })
    }

    /// Map a remote directory to its target (id and local counterpart)
    pub fn target_for(&self, remote_dir: &Path) -> Result<SyncTarget> {
        let relative =
            remote_dir
                .strip_prefix(&self.remote_root)
                .map_err(|_| DiscoveryError::OutsideRoot {
                    path: remote_dir.to_path_buf(),
                    root: self.remote_root.clone(),
                })?;

        let id = TargetId::from_relative(relative);
        let local_path = if id.is_root() {
            self.local_root.clone()
        } else {
            self.local_root.join(relative)
        };

        Ok(SyncTarget::new(id, remote_dir.to_path_buf(), local_path))
    }

    fn is_marker(&self, name: &OsStr) -> bool {
        self.marker_names.iter().any(|marker| name == OsStr::new(marker))
    }

    fn check_root(&self) -> Result<()> {
        let metadata = std::fs::metadata(&self.remote_root)
            .map_err(|_| DiscoveryError::RootUnavailable(self.remote_root.clone()))?;
        if !metadata.is_dir() {
            return Err(DiscoveryError::NotADirectory(self.remote_root.clone()));
        }
        Ok(())
    }
}
