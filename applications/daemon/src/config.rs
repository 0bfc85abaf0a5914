/// Daemon configuration loading
///
/// Sources, lowest precedence first:
/// 1. `--config <path>` (required to exist) or `turbosync.toml` if present
/// 2. `TURBOSYNC__SECTION__KEY` environment variables
/// 3. Legacy environment variables (`LOCAL_DIR`, `SYNC_INTERVAL`, ...)
use crate::error::{DaemonError, Result};
use std::path::{Path, PathBuf};
use turbo_core::SyncConfig;
use turbo_sync::split_options;

/// Config file picked up from the working directory when `--config` is absent
pub const DEFAULT_CONFIG_FILE: &str = "turbosync.toml";

/// Prefix of structured environment overrides
pub const ENV_PREFIX: &str = "TURBOSYNC";

/// A single value mapped from a legacy environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyValue {
    Text(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl From<LegacyValue> for config::ValueKind {
    fn from(value: LegacyValue) -> Self {
        match value {
            LegacyValue::Text(s) => config::ValueKind::String(s),
            LegacyValue::Int(i) => config::ValueKind::I64(i),
            LegacyValue::Bool(b) => config::ValueKind::Boolean(b),
            LegacyValue::List(items) => config::ValueKind::Array(
                items.into_iter().map(config::Value::from).collect(),
            ),
        }
    }
}

/// Builds the immutable `SyncConfig` snapshot
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self { file, env: None }
    }

    /// Read variables from `vars` instead of the process environment
    pub fn with_env(mut self, vars: config::Map<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    /// Load, merge and validate the configuration
    pub fn load(&self) -> Result<SyncConfig> {
        let mut builder = config::Config::builder();

        match &self.file {
            Some(path) => {
                if !path.exists() {
                    return Err(DaemonError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                builder = builder.add_source(config::File::from(path.as_path()));
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    tracing::debug!("Using {}", DEFAULT_CONFIG_FILE);
                    builder = builder.add_source(config::File::from(default));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(self.env.clone()),
        );

        for (key, value) in legacy_overrides(|name| self.var(name))? {
            builder = builder.set_override(key, config::ValueKind::from(value))?;
        }

        let config: SyncConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn var(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
        .filter(|value| !value.trim().is_empty())
    }
}

/// Map legacy environment variables onto configuration keys
pub fn legacy_overrides(
    var: impl Fn(&str) -> Option<String>,
) -> Result<Vec<(&'static str, LegacyValue)>> {
    let mut overrides = Vec::new();

    if let Some(path) = var("MOUNTED_VOLUME_PATH") {
        overrides.push(("paths.remote_root", LegacyValue::Text(expand_home(&path, &var))));
    }
    if let Some(path) = var("LOCAL_DIR") {
        overrides.push(("paths.local_root", LegacyValue::Text(expand_home(&path, &var))));
    }
    if let Some(minutes) = var("SYNC_INTERVAL") {
        let secs = parse_scaled("SYNC_INTERVAL", &minutes, 60)?;
        overrides.push(("schedule.scan_interval_secs", LegacyValue::Int(secs)));
    }
    if let Some(enabled) = var("WATCH_LOCAL_FILES") {
        overrides.push((
            "watch.enabled",
            LegacyValue::Bool(enabled.trim().eq_ignore_ascii_case("true")),
        ));
    }
    if let Some(seconds) = var("WATCH_DELAY_SECONDS") {
        let ms = parse_scaled("WATCH_DELAY_SECONDS", &seconds, 1000)?;
        overrides.push(("watch.debounce_ms", LegacyValue::Int(ms)));
    }
    if let Some(options) = var("RCLONE_OPTIONS") {
        overrides.push((
            "executor.extra_options",
            LegacyValue::List(split_options(&options)),
        ));
    }
    if let Some(count) = var("PARALLEL_PROCESSES") {
        let count = parse_number("PARALLEL_PROCESSES", &count)?;
        overrides.push(("schedule.max_parallel_jobs", LegacyValue::Int(count)));
    }

    Ok(overrides)
}

fn parse_number(name: &str, value: &str) -> Result<i64> {
    match value.trim().parse::<i64>() {
        Ok(n) if n >= 0 => Ok(n),
        _ => Err(DaemonError::Config(format!(
            "{} must be a non-negative integer, got {:?}",
            name, value
        ))),
    }
}

/// Parse a number given in a coarser unit and convert it
fn parse_scaled(name: &str, value: &str, factor: i64) -> Result<i64> {
    parse_number(name, value)?
        .checked_mul(factor)
        .ok_or_else(|| DaemonError::Config(format!("{} is too large: {}", name, value.trim())))
}

fn expand_home(path: &str, var: &impl Fn(&str) -> Option<String>) -> String {
    match (path.strip_prefix("~/"), var("HOME")) {
        (Some(rest), Some(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn env(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_legacy_variables_map_to_keys() {
        let overrides = legacy_overrides(lookup(&[
            ("MOUNTED_VOLUME_PATH", "/Volumes/work"),
            ("LOCAL_DIR", "~/Live_Work"),
            ("HOME", "/home/me"),
            ("SYNC_INTERVAL", "5"),
            ("WATCH_LOCAL_FILES", "False"),
            ("WATCH_DELAY_SECONDS", "3"),
            ("RCLONE_OPTIONS", "--bidir --transfers=8"),
            ("PARALLEL_PROCESSES", "6"),
        ]))
        .unwrap();

        let map: HashMap<_, _> = overrides.into_iter().collect();
        assert_eq!(map["paths.remote_root"], LegacyValue::Text("/Volumes/work".into()));
        assert_eq!(map["paths.local_root"], LegacyValue::Text("/home/me/Live_Work".into()));
        assert_eq!(map["schedule.scan_interval_secs"], LegacyValue::Int(300));
        assert_eq!(map["watch.enabled"], LegacyValue::Bool(false));
        assert_eq!(map["watch.debounce_ms"], LegacyValue::Int(3000));
        assert_eq!(
            map["executor.extra_options"],
            LegacyValue::List(vec!["--transfers=8".into()])
        );
        assert_eq!(map["schedule.max_parallel_jobs"], LegacyValue::Int(6));
    }

    #[test]
    fn test_bad_legacy_number_is_config_error() {
        let err = legacy_overrides(lookup(&[("SYNC_INTERVAL", "often")])).unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_oversized_legacy_number_is_config_error() {
        let err = legacy_overrides(lookup(&[("SYNC_INTERVAL", "9223372036854775807")]))
            .unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));

        let err =
            legacy_overrides(lookup(&[("WATCH_DELAY_SECONDS", "9223372036854776")])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_load_from_file_with_env_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("turbosync.toml");
        std::fs::write(
            &path,
            r#"
[paths]
remote_root = "/Volumes/work"
local_root = "/home/me/work"

[schedule]
max_parallel_jobs = 8

[[engines]]
role = "source"
api_address = "127.0.0.1:28384"

[[engines]]
role = "destination"
api_address = "127.0.0.1:28386"
"#,
        )
        .unwrap();

        let config = ConfigLoader::new(Some(path))
            .with_env(env(&[
                ("TURBOSYNC__SCHEDULE__MAX_RETRIES", "5"),
                ("PARALLEL_PROCESSES", "2"),
            ]))
            .load()
            .unwrap();

        assert_eq!(config.paths.remote_root, PathBuf::from("/Volumes/work"));
        assert_eq!(config.schedule.max_retries, 5);
        // Legacy variables win over the file
        assert_eq!(config.schedule.max_parallel_jobs, 2);
        assert_eq!(config.engines.len(), 2);
        assert!(config.watch.enabled);
    }

    #[test]
    fn test_env_only_configuration() {
        let config = ConfigLoader::new(None)
            .with_env(env(&[
                ("TURBOSYNC__PATHS__REMOTE_ROOT", "/mnt/remote"),
                ("LOCAL_DIR", "/srv/local"),
                ("WATCH_LOCAL_FILES", "true"),
            ]))
            .load()
            .unwrap();

        assert_eq!(config.paths.remote_root, PathBuf::from("/mnt/remote"));
        assert_eq!(config.paths.local_root, PathBuf::from("/srv/local"));
        assert!(config.engines.is_empty());
    }

    #[test]
    fn test_missing_roots_fail() {
        let err = ConfigLoader::new(None)
            .with_env(env(&[("LOCAL_DIR", "/srv/local")]))
            .load()
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let err = ConfigLoader::new(None)
            .with_env(env(&[
                ("MOUNTED_VOLUME_PATH", "/mnt/remote"),
                ("LOCAL_DIR", "relative/path"),
            ]))
            .load()
            .unwrap_err();
        assert!(err.to_string().contains("local_root"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let err = ConfigLoader::new(Some(PathBuf::from("/nonexistent/turbosync.toml")))
            .load()
            .unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)));
    }
}
