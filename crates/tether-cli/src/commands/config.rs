//! Config command implementations

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use tether_core::config::{self, TetherConfig};

fn resolve(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Load the configuration file, falling back to defaults when it does not exist
pub fn load_or_default(config_path: Option<&PathBuf>) -> Result<TetherConfig> {
    let path = resolve(config_path);

    let config = if path.exists() {
        tracing::debug!("Loading configuration from {:?}", path);
        config::load_config::<TetherConfig>(&path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?
    } else {
        tracing::debug!("No configuration at {:?}, using defaults", path);
        TetherConfig::default()
    };

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", path))?;
    Ok(config)
}

/// Get a config value by key
pub fn config_get(config_path: Option<&PathBuf>, key: &str) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        print_info("Run 'tether config init' to create one");
        return Ok(());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let table: toml::Table =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Walk the dotted path (e.g. "pool.max_connections")
    let mut current: &toml::Value = &toml::Value::Table(table);

    for part in key.split('.') {
        match current {
            toml::Value::Table(t) => {
                if let Some(v) = t.get(part) {
                    current = v;
                } else {
                    print_error(&format!("Key not found: {}", key));
                    return Ok(());
                }
            }
            _ => {
                print_error(&format!("Key not found: {}", key));
                return Ok(());
            }
        }
    }

    match current {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Integer(i) => println!("{}", i),
        toml::Value::Float(f) => println!("{}", f),
        toml::Value::Boolean(b) => println!("{}", b),
        toml::Value::Array(a) => {
            for item in a {
                println!("{}", item);
            }
        }
        toml::Value::Table(_) => {
            println!("{}", toml::to_string_pretty(current)?);
        }
        toml::Value::Datetime(d) => println!("{}", d),
    }

    Ok(())
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'tether config init' to create one");
        println!();
        print_info("Built-in defaults:");
        println!("{}", toml::to_string_pretty(&TetherConfig::default())?);
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    println!("{}", content);

    Ok(())
}

/// Initialize default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let config_file = resolve(config_path);

    if let Some(config_dir) = config_file.parent() {
        if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
            std::fs::create_dir_all(config_dir).with_context(|| {
                format!("Failed to create config directory: {:?}", config_dir)
            })?;
            print_success(&format!("Created config directory: {:?}", config_dir));
        }
    }

    if config_file.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_file));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    std::fs::write(&config_file, generate_default_config())
        .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

    print_success(&format!("Created configuration file: {:?}", config_file));
    Ok(())
}

/// Print the path of the configuration file
pub fn config_path(config_path: Option<&PathBuf>) -> Result<()> {
    println!("{}", resolve(config_path).display());
    Ok(())
}

/// Generate default configuration content
fn generate_default_config() -> String {
    r#"# tether configuration
# All durations are in milliseconds.

[pool]
# Maximum number of concurrently open connections
max_connections = 3
# How long to wait for the transport to report connected
connection_timeout = 30000
# Reservations unused for longer than this are evicted
idle_timeout = 60000
# Maximum time a request may wait for a free slot
queue_timeout = 120000
# Transport status poll interval while connecting
status_poll_interval = 100
# Delay between queued connection attempts
queue_pacing = 500
# Automatic cleanup interval
cleanup_interval = 30000

[monitor]
# Interval between health check passes
check_interval = 30000
# Heartbeat reply deadline
health_timeout = 5000
# Pause between release and re-acquire on reconnect
reconnect_delay = 2000
# Reconnect attempts before an id is abandoned
max_reconnect_attempts = 3
# Age after which health records and events are pruned
stats_retention_time = 3600000
# Queue priority of reconnect requests
reconnect_priority = 10
# Check summaries kept in history
history_capacity = 100
# Reconnect events kept in the log
event_capacity = 200

[scheduler]
# Tasks allowed to run at once
max_concurrency = 1
# Per-attempt deadline
task_timeout = 60000
# Pause before a failed task is retried
retry_delay = 2000
# Retries after the first attempt
max_retries = 2
# Delay between task launches
launch_pacing = 100
# Finished tasks kept in history
history_capacity = 100
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_matches_defaults() {
        let parsed: TetherConfig = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(parsed, TetherConfig::default());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = load_or_default(Some(&path)).unwrap();
        assert_eq!(config, TetherConfig::default());
    }

    #[test]
    fn test_load_or_default_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pool]\nmax_connections = 0\n").unwrap();
        assert!(load_or_default(Some(&path)).is_err());
    }

    #[test]
    fn test_init_respects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[pool]\nmax_connections = 9\n").unwrap();

        config_init(Some(&path), false).unwrap();
        let config = load_or_default(Some(&path)).unwrap();
        assert_eq!(config.pool.max_connections, 9);

        config_init(Some(&path), true).unwrap();
        let config = load_or_default(Some(&path)).unwrap();
        assert_eq!(config.pool.max_connections, 3);
    }
}
