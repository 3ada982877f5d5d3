//! Health monitor configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;
use crate::types::{Priority, RECONNECT_PRIORITY};

/// Configuration for the health monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between health check passes
    #[serde(with = "duration_millis")]
    pub check_interval: Duration,

    /// Heartbeat deadline
    #[serde(with = "duration_millis")]
    pub health_timeout: Duration,

    /// Pause between releasing a dead connection and re-acquiring it
    #[serde(with = "duration_millis")]
    pub reconnect_delay: Duration,

    /// Reconnect cycles allowed before giving up on an id
    pub max_reconnect_attempts: u32,

    /// Health records and events older than this are pruned
    #[serde(with = "duration_millis")]
    pub stats_retention_time: Duration,

    /// Queue priority used when re-acquiring after a failed check
    pub reconnect_priority: Priority,

    /// Number of check-pass summaries kept
    pub history_capacity: usize,

    /// Number of reconnect events kept
    pub event_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_millis(30_000),
            health_timeout: Duration::from_millis(5_000),
            reconnect_delay: Duration::from_millis(2_000),
            max_reconnect_attempts: 3,
            stats_retention_time: Duration::from_millis(3_600_000),
            reconnect_priority: RECONNECT_PRIORITY,
            history_capacity: 100,
            event_capacity: 200,
        }
    }
}

impl MonitorConfig {
    /// Reject settings that would make the monitor spin
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "monitor.check_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
