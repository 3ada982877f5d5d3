//! Task scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_millis;
use crate::error::ConfigError;

/// Configuration for the task scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks running at once
    pub max_concurrency: usize,

    /// Per-attempt deadline
    #[serde(with = "duration_millis")]
    pub task_timeout: Duration,

    /// Pause before a failed task is re-queued
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    /// Retries allowed after the first attempt
    pub max_retries: u32,

    /// Delay between successive task launches
    #[serde(with = "duration_millis")]
    pub launch_pacing: Duration,

    /// Number of finished tasks kept in history
    pub history_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            task_timeout: Duration::from_millis(60_000),
            retry_delay: Duration::from_millis(2_000),
            max_retries: 2,
            launch_pacing: Duration::from_millis(100),
            history_capacity: 100,
        }
    }
}

impl SchedulerConfig {
    /// Reject settings that would stall the scheduler
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
