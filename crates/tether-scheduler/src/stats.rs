//! Scheduler statistics

use serde::{Deserialize, Serialize};
use std::time::Duration;

use tether_core::time::duration_millis;

#[derive(Debug, Default, Clone)]
pub(crate) struct SchedulerCounters {
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,
    execution_ms: u64,
    execution_samples: u64,
}

impl SchedulerCounters {
    pub fn record_execution(&mut self, took: Duration) {
        self.execution_ms = self.execution_ms.saturating_add(duration_millis(took));
        self.execution_samples += 1;
    }

    pub fn snapshot(&self) -> SchedulerStats {
        let avg_execution_ms = if self.execution_samples == 0 {
            0.0
        } else {
            self.execution_ms as f64 / self.execution_samples as f64
        };
        let success_rate = if self.total_enqueued == 0 {
            0.0
        } else {
            self.total_completed as f64 / self.total_enqueued as f64 * 100.0
        };

        SchedulerStats {
            total_enqueued: self.total_enqueued,
            total_completed: self.total_completed,
            total_failed: self.total_failed,
            total_cancelled: self.total_cancelled,
            total_retries: self.total_retries,
            avg_execution_ms,
            success_rate,
        }
    }
}

/// Counters returned by `get_stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_enqueued: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,
    /// Mean duration of completed tasks
    pub avg_execution_ms: f64,
    /// Completed tasks as a percentage of enqueued tasks
    pub success_rate: f64,
}

/// Point-in-time view returned by `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub queue_length: usize,
    pub running_tasks: usize,
    /// Tasks waiting out their retry delay
    pub retrying_tasks: usize,
    /// Finished tasks still held in history
    pub completed_tasks: usize,
    pub is_paused: bool,
    pub stats: SchedulerStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let stats = SchedulerCounters::default().snapshot();
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.avg_execution_ms, 0.0);
    }

    #[test]
    fn test_success_rate_is_completed_over_enqueued() {
        let mut counters = SchedulerCounters {
            total_enqueued: 4,
            total_completed: 3,
            ..SchedulerCounters::default()
        };
        counters.record_execution(Duration::from_millis(10));
        counters.record_execution(Duration::from_millis(30));

        let stats = counters.snapshot();
        assert_eq!(stats.success_rate, 75.0);
        assert_eq!(stats.avg_execution_ms, 20.0);
    }
}
