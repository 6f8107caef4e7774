//! fleetbench configuration file support.
//!
//! Settings are read from `~/.fleetbench/config.toml`, then `./.fleetbenchrc`,
//! then `FLEETBENCH_*` environment variables. Later sources win.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Log level (error, warn, info, debug, trace).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Directory artifacts are collected into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// How the ssh transport invokes the system client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub program: String,
    pub scp_program: String,
    pub connect_timeout_secs: u64,
    /// Extra `-o` options, e.g. `StrictHostKeyChecking=no`.
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            connect_timeout_secs: 10,
            options: Vec::new(),
        }
    }
}

/// Execution defaults applied when a task leaves them unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout for `sync` tasks without `timeout_secs`.
    pub default_timeout_secs: u64,
    pub poll_retries: u32,
    pub poll_delay_secs: u64,
    /// Time allowed for stopping jobs on cancellation or teardown.
    pub grace_period_secs: u64,
    /// Per-job bookkeeping directory on each host.
    pub remote_work_dir: String,
    /// Extra attempts after a failed connection.
    pub connect_retries: u32,
    pub connect_retry_delay_ms: u64,
    /// Width of the time bucket used in artifact names.
    pub time_bucket_minutes: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 3600,
            poll_retries: 100,
            poll_delay_secs: 10,
            grace_period_secs: 10,
            remote_work_dir: "/tmp/fleetbench".to_string(),
            connect_retries: 2,
            connect_retry_delay_ms: 1000,
            time_bucket_minutes: 10,
        }
    }
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// One configuration file as written.
///
/// Every key is optional so that a later file only overrides the keys it
/// actually sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigLayer {
    pub log_level: Option<String>,
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub ssh: SshLayer,
    #[serde(default)]
    pub execution: ExecutionLayer,
}

/// The `[ssh]` table of a [`ConfigLayer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SshLayer {
    pub program: Option<String>,
    pub scp_program: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub options: Option<Vec<String>>,
}

/// The `[execution]` table of a [`ConfigLayer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExecutionLayer {
    pub default_timeout_secs: Option<u64>,
    pub poll_retries: Option<u32>,
    pub poll_delay_secs: Option<u64>,
    pub grace_period_secs: Option<u64>,
    pub remote_work_dir: Option<String>,
    pub connect_retries: Option<u32>,
    pub connect_retry_delay_ms: Option<u64>,
    pub time_bucket_minutes: Option<u32>,
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum FleetConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read or write a configuration file.
    #[error("Failed to read configuration file: {0}")]
    Read(String),

    /// Failed to parse or serialize a configuration file.
    #[error("Failed to parse configuration file: {0}")]
    Parse(String),

    /// An environment override holds an invalid value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type FleetConfigResult<T> = std::result::Result<T, FleetConfigError>;

impl FleetConfig {
    /// Load configuration from a TOML file. Keys it leaves out keep their defaults.
    pub fn load_from_file(path: &Path) -> FleetConfigResult<Self> {
        let mut config = Self::default();
        config.merge(Self::load_layer(path)?);
        Ok(config)
    }

    /// Read a TOML file without filling in defaults.
    pub fn load_layer(path: &Path) -> FleetConfigResult<ConfigLayer> {
        if !path.exists() {
            return Err(FleetConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| FleetConfigError::Read(format!("{}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| FleetConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> FleetConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FleetConfigError::Parse(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FleetConfigError::Read(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| FleetConfigError::Read(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".fleetbench")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".fleetbenchrc")
    }

    /// Discover and load configuration files, then apply environment overrides.
    ///
    /// A missing file is skipped. A file that exists but cannot be parsed is
    /// an error so a typo never silently falls back to defaults.
    pub fn discover_and_load() -> FleetConfigResult<Self> {
        let mut config = Self::default();

        for path in [Self::default_global_path(), Self::default_local_path()] {
            match Self::load_layer(&path) {
                Ok(layer) => {
                    debug!(path = %path.display(), "Loaded configuration file");
                    config.merge(layer);
                }
                Err(FleetConfigError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Merge a configuration file into this one.
    ///
    /// Values from `layer` override values in `self` if they are Some.
    pub fn merge(&mut self, layer: ConfigLayer) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        if layer.log_level.is_some() {
            self.log_level = layer.log_level;
        }
        if layer.output_dir.is_some() {
            self.output_dir = layer.output_dir;
        }

        let ssh = layer.ssh;
        set(&mut self.ssh.program, ssh.program);
        set(&mut self.ssh.scp_program, ssh.scp_program);
        set(&mut self.ssh.connect_timeout_secs, ssh.connect_timeout_secs);
        set(&mut self.ssh.options, ssh.options);

        let exec = layer.execution;
        set(
            &mut self.execution.default_timeout_secs,
            exec.default_timeout_secs,
        );
        set(&mut self.execution.poll_retries, exec.poll_retries);
        set(&mut self.execution.poll_delay_secs, exec.poll_delay_secs);
        set(
            &mut self.execution.grace_period_secs,
            exec.grace_period_secs,
        );
        set(&mut self.execution.remote_work_dir, exec.remote_work_dir);
        set(&mut self.execution.connect_retries, exec.connect_retries);
        set(
            &mut self.execution.connect_retry_delay_ms,
            exec.connect_retry_delay_ms,
        );
        set(
            &mut self.execution.time_bucket_minutes,
            exec.time_bucket_minutes,
        );
    }

    /// Apply `FLEETBENCH_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> FleetConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> FleetConfigResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| FleetConfigError::InvalidValue(format!("{}={}", key, value)))
        }

        if let Some(v) = lookup("FLEETBENCH_LOG_LEVEL") {
            self.log_level = Some(v);
        }
        if let Some(v) = lookup("FLEETBENCH_OUTPUT_DIR") {
            self.output_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FLEETBENCH_SSH_PROGRAM") {
            self.ssh.program = v;
        }
        if let Some(v) = lookup("FLEETBENCH_SCP_PROGRAM") {
            self.ssh.scp_program = v;
        }
        if let Some(v) = lookup("FLEETBENCH_CONNECT_TIMEOUT_SECS") {
            self.ssh.connect_timeout_secs = parse("FLEETBENCH_CONNECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("FLEETBENCH_DEFAULT_TIMEOUT_SECS") {
            self.execution.default_timeout_secs = parse("FLEETBENCH_DEFAULT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("FLEETBENCH_POLL_RETRIES") {
            self.execution.poll_retries = parse("FLEETBENCH_POLL_RETRIES", &v)?;
        }
        if let Some(v) = lookup("FLEETBENCH_POLL_DELAY_SECS") {
            self.execution.poll_delay_secs = parse("FLEETBENCH_POLL_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("FLEETBENCH_GRACE_PERIOD_SECS") {
            self.execution.grace_period_secs = parse("FLEETBENCH_GRACE_PERIOD_SECS", &v)?;
        }
        if let Some(v) = lookup("FLEETBENCH_REMOTE_WORK_DIR") {
            self.execution.remote_work_dir = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.ssh.program, "ssh");
        assert_eq!(config.execution.poll_retries, 100);
        assert_eq!(config.execution.poll_delay_secs, 10);
        assert_eq!(config.execution.grace_period(), Duration::from_secs(10));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = FleetConfig::default();
        config.log_level = Some("debug".to_string());
        config.ssh.options = vec!["StrictHostKeyChecking=no".to_string()];
        config.save_to_file(&path).unwrap();

        let loaded = FleetConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[execution]\npoll_retries = 5\n").unwrap();

        let loaded = FleetConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.execution.poll_retries, 5);
        assert_eq!(loaded.execution.poll_delay_secs, 10);
        assert_eq!(loaded.ssh, SshConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let result = FleetConfig::load_from_file(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(FleetConfigError::NotFound(_))));
    }

    #[test]
    fn test_merge_overrides_set_values() {
        let mut base = FleetConfig::default();
        base.log_level = Some("info".to_string());

        let local = ConfigLayer {
            output_dir: Some(PathBuf::from("results")),
            execution: ExecutionLayer {
                grace_period_secs: Some(3),
                ..ExecutionLayer::default()
            },
            ..ConfigLayer::default()
        };

        base.merge(local);
        assert_eq!(base.log_level.as_deref(), Some("info"));
        assert_eq!(base.output_dir, Some(PathBuf::from("results")));
        assert_eq!(base.execution.grace_period_secs, 3);
    }

    #[test]
    fn test_layers_merge_key_by_key() {
        let dir = TempDir::new().unwrap();
        let global = dir.path().join("config.toml");
        let local = dir.path().join(".fleetbenchrc");
        std::fs::write(
            &global,
            "[execution]\npoll_retries = 500\n\n[ssh]\nconnect_timeout_secs = 30\n",
        )
        .unwrap();
        std::fs::write(&local, "[execution]\ngrace_period_secs = 3\npoll_delay_secs = 10\n")
            .unwrap();

        let mut config = FleetConfig::default();
        config.merge(FleetConfig::load_layer(&global).unwrap());
        config.merge(FleetConfig::load_layer(&local).unwrap());

        assert_eq!(config.execution.poll_retries, 500);
        assert_eq!(config.execution.grace_period_secs, 3);
        assert_eq!(config.execution.poll_delay_secs, 10);
        assert_eq!(config.ssh.connect_timeout_secs, 30);
        assert_eq!(config.ssh.program, "ssh");
    }

    #[test]
    fn test_later_layer_can_restore_a_default() {
        let mut config = FleetConfig::default();
        config.execution.poll_retries = 500;

        config.merge(ConfigLayer {
            execution: ExecutionLayer {
                poll_retries: Some(100),
                ..ExecutionLayer::default()
            },
            ..ConfigLayer::default()
        });
        assert_eq!(config.execution.poll_retries, 100);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FLEETBENCH_POLL_RETRIES", "7"),
            ("FLEETBENCH_SSH_PROGRAM", "/usr/local/bin/ssh"),
        ]
        .into_iter()
        .collect();

        let mut config = FleetConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(ToString::to_string)).unwrap();
        assert_eq!(config.execution.poll_retries, 7);
        assert_eq!(config.ssh.program, "/usr/local/bin/ssh");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = FleetConfig::default();
        let result = config.apply_env_overrides(|k| {
            (k == "FLEETBENCH_POLL_DELAY_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(FleetConfigError::InvalidValue(_))));
    }
}
