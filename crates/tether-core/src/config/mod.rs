//! Configuration management for tether

mod monitor;
mod pool;
mod scheduler;
pub mod serde_utils;

pub use monitor::MonitorConfig;
pub use pool::PoolConfig;
pub use scheduler::SchedulerConfig;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration file: one section per engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Connection slot pool settings
    pub pool: PoolConfig,
    /// Health monitor settings
    pub monitor: MonitorConfig,
    /// Task scheduler settings
    pub scheduler: SchedulerConfig,
}

impl TetherConfig {
    /// Check every section for values the engines cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.monitor.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TetherConfig::default();
        assert_eq!(config.pool.max_connections, 3);
        assert_eq!(config.pool.connection_timeout, Duration::from_millis(30_000));
        assert_eq!(config.pool.idle_timeout, Duration::from_millis(60_000));
        assert_eq!(config.pool.queue_timeout, Duration::from_millis(120_000));
        assert_eq!(config.monitor.check_interval, Duration::from_millis(30_000));
        assert_eq!(config.monitor.health_timeout, Duration::from_millis(5_000));
        assert_eq!(config.monitor.reconnect_delay, Duration::from_millis(2_000));
        assert_eq!(config.monitor.max_reconnect_attempts, 3);
        assert_eq!(
            config.monitor.stats_retention_time,
            Duration::from_millis(3_600_000)
        );
        assert_eq!(config.scheduler.max_concurrency, 1);
        assert_eq!(config.scheduler.task_timeout, Duration::from_millis(60_000));
        assert_eq!(config.scheduler.retry_delay, Duration::from_millis(2_000));
        assert_eq!(config.scheduler.max_retries, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let config: TetherConfig = toml::from_str(
            r#"
            [pool]
            max_connections = 8
            queue_timeout = 5000

            [scheduler]
            max_retries = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.max_connections, 8);
        assert_eq!(config.pool.queue_timeout, Duration::from_secs(5));
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.scheduler.max_retries, 0);
        assert_eq!(config.monitor, MonitorConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = TetherConfig::default();
        config.pool.max_connections = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = TetherConfig::default();
        config.scheduler.max_concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = TetherConfig::default();
        config.monitor.max_reconnect_attempts = 7;
        save_config(&path, &config).unwrap();

        let loaded: TetherConfig = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let result: Result<TetherConfig, _> = load_config(Path::new("/nonexistent/tether.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
