use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::{BuiltinRegistry, SchemaRegistry};

pub const ENV_SCHEMA_DIR: &str = "DBFIX_SCHEMA_DIR";
pub const ENV_NO_LOCK: &str = "DBFIX_NO_LOCK";
pub const ENV_LOG: &str = "DBFIX_LOG";
pub const ENV_LOG_JSON: &str = "DBFIX_LOG_JSON";
pub const ENV_PROGRESS_INTERVAL_MS: &str = "DBFIX_PROGRESS_INTERVAL_MS";

pub const DEFAULT_LOG_FILTER: &str = "dbfix=info";
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;
const MIN_PROGRESS_INTERVAL_MS: u64 = 10;
const MAX_PROGRESS_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixConfig {
    pub schema_dir: Option<PathBuf>,
    pub use_lock: bool,
    pub log_filter: String,
    pub log_json: bool,
    pub progress_interval: Duration,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            schema_dir: None,
            use_lock: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_json: false,
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
        }
    }
}

fn flag(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

impl FixConfig {
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let schema_dir = lookup(ENV_SCHEMA_DIR)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        let log_filter = lookup(ENV_LOG)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let progress_interval = lookup(ENV_PROGRESS_INTERVAL_MS)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|value| value.clamp(MIN_PROGRESS_INTERVAL_MS, MAX_PROGRESS_INTERVAL_MS))
            .unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS);

        Self {
            schema_dir,
            use_lock: !flag(lookup(ENV_NO_LOCK)),
            log_filter,
            log_json: flag(lookup(ENV_LOG_JSON)),
            progress_interval: Duration::from_millis(progress_interval),
        }
    }

    pub fn with_progress_interval_ms(mut self, millis: u64) -> Self {
        self.progress_interval = Duration::from_millis(
            millis.clamp(MIN_PROGRESS_INTERVAL_MS, MAX_PROGRESS_INTERVAL_MS),
        );
        self
    }

    pub fn registry(&self) -> Arc<dyn SchemaRegistry> {
        match &self.schema_dir {
            Some(dir) => Arc::new(BuiltinRegistry::with_schema_dir(dir)),
            None => Arc::new(BuiltinRegistry::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> FixConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FixConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        assert_eq!(load(&[]), FixConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            (ENV_SCHEMA_DIR, "/opt/schemas"),
            (ENV_NO_LOCK, "1"),
            (ENV_LOG, "dbfix=debug"),
            (ENV_LOG_JSON, "true"),
            (ENV_PROGRESS_INTERVAL_MS, "250"),
        ]);
        assert_eq!(config.schema_dir, Some(PathBuf::from("/opt/schemas")));
        assert!(!config.use_lock);
        assert_eq!(config.log_filter, "dbfix=debug");
        assert!(config.log_json);
        assert_eq!(config.progress_interval, Duration::from_millis(250));
    }

    #[test]
    fn clamps_progress_interval_and_ignores_garbage() {
        assert_eq!(
            load(&[(ENV_PROGRESS_INTERVAL_MS, "1")]).progress_interval,
            Duration::from_millis(MIN_PROGRESS_INTERVAL_MS)
        );
        assert_eq!(
            load(&[(ENV_PROGRESS_INTERVAL_MS, "soon")]).progress_interval,
            Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS)
        );
        assert!(load(&[(ENV_NO_LOCK, "0")]).use_lock);
    }
}
