//! Sync engine invocation building.
//!
//! Arguments are built from the trusted template and the target's paths only.
//! Placeholders are replaced inside individual arguments; nothing ever goes
//! through a shell, so a path with spaces or quotes stays one argument.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use turbo_core::config::{ExecutorSettings, ID_PLACEHOLDER, LOCAL_PLACEHOLDER, REMOTE_PLACEHOLDER};
use turbo_core::SyncTarget;

/// Option that selects a full resync of both sides
pub const RESYNC_FLAG: &str = "--resync";

/// Options removed from `extra_options`; bisync is already bidirectional
const DROPPED_OPTIONS: &[&str] = &["--bidir"];

/// Fully built command line for one run of the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Invocation {
    /// Build the invocation for `target`, optionally with `--resync` appended
    pub fn build(settings: &ExecutorSettings, target: &SyncTarget, resync: bool) -> Self {
        let mut args: Vec<OsString> = settings
            .args
            .iter()
            .map(|arg| substitute(arg, target))
            .collect();

        args.extend(
            settings
                .extra_options
                .iter()
                .filter(|opt| !DROPPED_OPTIONS.contains(&opt.as_str()))
                .map(|opt| substitute(opt, target)),
        );

        if resync {
            args.push(OsString::from(RESYNC_FLAG));
        }

        Self {
            program: settings.binary.clone(),
            args,
        }
    }

    /// Human readable command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Split legacy whitespace-separated options, dropping `--bidir`
pub fn split_options(options: &str) -> Vec<String> {
    options
        .split_whitespace()
        .filter(|opt| !DROPPED_OPTIONS.contains(opt))
        .map(str::to_string)
        .collect()
}

fn substitute(template: &str, target: &SyncTarget) -> OsString {
    let replacements: [(&str, &OsStr); 3] = [
        (REMOTE_PLACEHOLDER, target.remote_path.as_os_str()),
        (LOCAL_PLACEHOLDER, target.local_path.as_os_str()),
        (ID_PLACEHOLDER, OsStr::new(target.id.as_str())),
    ];

    let mut out = OsString::new();
    let mut rest = template;

    loop {
        let next = replacements
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|pos| (pos, *key, *value)))
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, key, value)) => {
                out.push(&rest[..pos]);
                out.push(value);
                rest = &rest[pos + key.len()..];
            }
            None => {
                out.push(rest);
                return out;
            }
        }
    }
}
