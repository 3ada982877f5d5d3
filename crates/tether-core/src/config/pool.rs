//! Connection pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Configuration for the connection slot pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of concurrently open connections
    pub max_connections: usize,

    /// How long to wait for the transport to report `connected`
    #[serde(with = "duration_millis")]
    pub connection_timeout: Duration,

    /// Reservations unused for longer than this are evicted by cleanup
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    /// Maximum time a request may wait for a free slot
    #[serde(with = "duration_millis")]
    pub queue_timeout: Duration,

    /// Interval between transport status polls while connecting
    #[serde(with = "duration_millis")]
    pub status_poll_interval: Duration,

    /// Delay between successive connection attempts when draining the queue
    #[serde(with = "duration_millis")]
    pub queue_pacing: Duration,

    /// Interval of the automatic cleanup pass
    #[serde(with = "duration_millis")]
    pub cleanup_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 3,
            connection_timeout: Duration::from_millis(30_000),
            idle_timeout: Duration::from_millis(60_000),
            queue_timeout: Duration::from_millis(120_000),
            status_poll_interval: Duration::from_millis(100),
            queue_pacing: Duration::from_millis(500),
            cleanup_interval: Duration::from_millis(30_000),
        }
    }
}

impl PoolConfig {
    /// Reject settings that would stall the pool
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if self.status_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "pool.status_poll_interval must be non-zero".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "pool.cleanup_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
