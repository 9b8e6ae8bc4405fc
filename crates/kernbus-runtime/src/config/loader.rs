//! Configuration loader with hierarchical merging.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Global config (`~/.kernbus/config.toml`)
//! 3. Project config (`<root>/.kernbus/config.toml`)
//! 4. Environment variables (`KERNBUS_*`)
//!
//! Each layer overrides the previous. File layers are merged as TOML
//! tables before decoding, so a project file that sets one key of a
//! section keeps the global file's other keys in that section.

use super::{
    default_config_path, BusConfig, ConfigError, PROJECT_CONFIG_DIR, PROJECT_CONFIG_FILE,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Parses an environment variable into a config field via [`FromStr`].
macro_rules! parse_env {
    ($self:ident, $field:expr, $var:literal) => {
        if let Some(val) = $self.env_var($var) {
            $field = parse_value(&val).map_err(|msg| ConfigError::invalid_env_var($var, msg))?;
        }
    };
}

/// Helper macro for parsing boolean environment variables.
macro_rules! parse_env_bool {
    ($self:ident, $field:expr, $var:literal) => {
        if let Some(val) = $self.env_var($var) {
            $field = parse_bool(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected bool"))?;
        }
    };
}

/// Configuration loader with builder pattern.
///
/// # Example
///
/// ```no_run
/// use kernbus_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .with_project_root("/path/to/project")
///     .skip_env_vars()
///     .load()?;
/// # Ok::<(), kernbus_runtime::config::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Global config file path (defaults to ~/.kernbus/config.toml).
    global_config_path: Option<PathBuf>,

    /// Project root directory.
    project_root: Option<PathBuf>,

    /// Replaces the process environment when set.
    env_override: Option<HashMap<String, String>>,

    skip_env: bool,
    skip_global: bool,
    skip_project: bool,
}

impl ConfigLoader {
    /// Creates a new loader with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a custom global config path.
    #[must_use]
    pub fn with_global_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Sets the project root directory.
    ///
    /// Project config will be loaded from `<project_root>/.kernbus/config.toml`.
    #[must_use]
    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_root = Some(path.into());
        self
    }

    /// Reads environment overrides from `vars` instead of the process
    /// environment.
    #[must_use]
    pub fn with_env_vars<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env_override = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Skips environment variable loading.
    ///
    /// Useful for testing with deterministic config.
    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Skips global config loading.
    #[must_use]
    pub fn skip_global_config(mut self) -> Self {
        self.skip_global = true;
        self
    }

    /// Skips project config loading.
    #[must_use]
    pub fn skip_project_config(mut self) -> Self {
        self.skip_project = true;
        self
    }

    /// Loads, merges and validates configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any config file exists but cannot be
    /// parsed, an environment variable has an unusable value, or the merged
    /// result fails [`BusConfig::validate`]. Missing config files are
    /// silently ignored.
    pub fn load(&self) -> Result<BusConfig, ConfigError> {
        let mut merged = toml::Table::new();

        // Layer 1: Global config
        if !self.skip_global {
            let global_path = self
                .global_config_path
                .clone()
                .unwrap_or_else(default_config_path);

            if let Some(table) = load_table(&global_path)? {
                debug!(path = %global_path.display(), "Loaded global config");
                merge_tables(&mut merged, table);
            }
        }

        // Layer 2: Project config
        if !self.skip_project {
            if let Some(ref project_root) = self.project_root {
                let project_config_path = project_root
                    .join(PROJECT_CONFIG_DIR)
                    .join(PROJECT_CONFIG_FILE);

                if let Some(table) = load_table(&project_config_path)? {
                    debug!(
                        path = %project_config_path.display(),
                        project = %project_root.display(),
                        "Loaded project config"
                    );
                    merge_tables(&mut merged, table);
                }
            }
        }

        let mut config: BusConfig = toml::Value::Table(merged).try_into()?;

        // Layer 3: Environment variables
        if !self.skip_env {
            self.apply_env_vars(&mut config)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn env_var(&self, name: &str) -> Option<String> {
        match &self.env_override {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    /// Applies environment variable overrides.
    fn apply_env_vars(&self, config: &mut BusConfig) -> Result<(), ConfigError> {
        parse_env!(self, config.queue.batch_size, "KERNBUS_BATCH_SIZE");
        parse_env!(self, config.queue.max_retries, "KERNBUS_MAX_RETRIES");
        parse_env!(self, config.backpressure.policy, "KERNBUS_BACKPRESSURE_POLICY");
        parse_env!(self, config.backpressure.high_watermark, "KERNBUS_HIGH_WATERMARK");
        parse_env!(self, config.backpressure.low_watermark, "KERNBUS_LOW_WATERMARK");
        parse_env!(self, config.kernel.max_events, "KERNBUS_MAX_EVENTS");
        parse_env!(self, config.router.default_timeout_ms, "KERNBUS_REQUEST_TIMEOUT_MS");
        parse_env!(self, config.scheduler.tick_interval_ms, "KERNBUS_TICK_INTERVAL_MS");
        parse_env!(self, config.persistor.backend, "KERNBUS_PERSISTOR_BACKEND");
        parse_env_bool!(self, config.scheduler.evict_terminal, "KERNBUS_EVICT_TERMINAL");

        if let Some(val) = self.env_var("KERNBUS_PERSISTOR_CONNECTION") {
            config.persistor.connection = val;
        }

        Ok(())
    }
}

/// Loads a config file as a raw table, returning None if it doesn't exist.
fn load_table(path: &Path) -> Result<Option<toml::Table>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let table = content
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::parse_toml(path, e))?;

    Ok(Some(table))
}

/// Recursively merges `overlay` into `base`. Tables merge key by key,
/// every other value is replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_value<T>(s: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.trim().parse::<T>().map_err(|e| e.to_string())
}

/// Parses a boolean from string.
///
/// Accepts: "true", "false", "1", "0", "yes", "no", "on", "off"
/// (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackpressurePolicy, PersistorBackend};
    use tempfile::TempDir;

    fn create_config_file(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_defaults_only() {
        let config = ConfigLoader::new()
            .skip_global_config()
            .skip_project_config()
            .skip_env_vars()
            .load()
            .unwrap();

        assert_eq!(config, BusConfig::default());
    }

    #[test]
    fn load_global_config() {
        let temp = TempDir::new().unwrap();
        let config_path = create_config_file(
            temp.path(),
            r#"
[queue]
max_retries = 7

[kernel]
max_events = 5
"#,
        );

        let config = ConfigLoader::new()
            .with_global_config(&config_path)
            .skip_project_config()
            .skip_env_vars()
            .load()
            .unwrap();

        assert_eq!(config.queue.max_retries, 7);
        assert_eq!(config.kernel.max_events, 5);
    }

    #[test]
    fn project_overrides_single_key_and_keeps_global_siblings() {
        let global_temp = TempDir::new().unwrap();
        let project_temp = TempDir::new().unwrap();

        let dot_dir = project_temp.path().join(PROJECT_CONFIG_DIR);
        std::fs::create_dir_all(&dot_dir).unwrap();

        let global_path = create_config_file(
            global_temp.path(),
            r#"
[backpressure]
policy = "delay"
high_watermark = 100
low_watermark = 50
"#,
        );

        create_config_file(
            &dot_dir,
            r#"
[backpressure]
high_watermark = 60
"#,
        );

        let config = ConfigLoader::new()
            .with_global_config(&global_path)
            .with_project_root(project_temp.path())
            .skip_env_vars()
            .load()
            .unwrap();

        // policy and low_watermark from global, high_watermark from project
        assert_eq!(config.backpressure.policy, BackpressurePolicy::Delay);
        assert_eq!(config.backpressure.low_watermark, 50);
        assert_eq!(config.backpressure.high_watermark, 60);
    }

    #[test]
    fn missing_config_files_ok() {
        let config = ConfigLoader::new()
            .with_global_config("/nonexistent/path/config.toml")
            .with_project_root("/nonexistent/project")
            .skip_env_vars()
            .load()
            .unwrap();

        assert_eq!(config, BusConfig::default());
    }

    #[test]
    fn malformed_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = create_config_file(temp.path(), "[queue\nbatch_size = ");

        let err = ConfigLoader::new()
            .with_global_config(&path)
            .skip_env_vars()
            .load()
            .unwrap_err();

        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn merged_result_is_validated() {
        let temp = TempDir::new().unwrap();
        let path = create_config_file(temp.path(), "[queue]\nbatch_size = 0\n");

        let err = ConfigLoader::new()
            .with_global_config(&path)
            .skip_env_vars()
            .load()
            .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "queue.batch_size"));
    }

    #[test]
    fn env_vars_override_files() {
        let temp = TempDir::new().unwrap();
        let path = create_config_file(temp.path(), "[queue]\nmax_retries = 2\n");

        let config = ConfigLoader::new()
            .with_global_config(&path)
            .skip_project_config()
            .with_env_vars([
                ("KERNBUS_MAX_RETRIES", "9"),
                ("KERNBUS_BACKPRESSURE_POLICY", "shed_lowest"),
                ("KERNBUS_PERSISTOR_BACKEND", "document-store"),
                ("KERNBUS_PERSISTOR_CONNECTION", "/srv/kernbus"),
                ("KERNBUS_EVICT_TERMINAL", "off"),
            ])
            .load()
            .unwrap();

        assert_eq!(config.queue.max_retries, 9);
        assert_eq!(config.backpressure.policy, BackpressurePolicy::ShedLowest);
        assert_eq!(config.persistor.backend, PersistorBackend::DocumentStore);
        assert_eq!(config.persistor.connection, "/srv/kernbus");
        assert!(!config.scheduler.evict_terminal);
    }

    #[test]
    fn invalid_env_var_is_rejected() {
        let err = ConfigLoader::new()
            .skip_global_config()
            .skip_project_config()
            .with_env_vars([("KERNBUS_MAX_EVENTS", "lots")])
            .load()
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidEnvVar { ref name, .. } if name == "KERNBUS_MAX_EVENTS"));
    }

    #[test]
    fn merge_replaces_scalars_and_arrays() {
        let mut base: toml::Table = "a = 1\nlist = [1, 2]\n[t]\nx = 1\ny = 2\n".parse().unwrap();
        let overlay: toml::Table = "list = [3]\n[t]\ny = 5\n".parse().unwrap();
        merge_tables(&mut base, overlay);

        assert_eq!(base["a"].as_integer(), Some(1));
        assert_eq!(base["list"].as_array().map(Vec::len), Some(1));
        assert_eq!(base["t"]["x"].as_integer(), Some(1));
        assert_eq!(base["t"]["y"].as_integer(), Some(5));
    }

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
