//! Pool statistics

use serde::{Deserialize, Serialize};
use std::time::Duration;

use tether_core::time::duration_millis;
use tether_core::ConnectionId;

/// Running totals kept by the pool
///
/// Averages are stored as sums and sample counts so memory stays flat
/// however long the pool runs.
#[derive(Debug, Default, Clone)]
pub(crate) struct PoolCounters {
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_failed: u64,
    pub total_timeout: u64,
    queue_wait_ms: u64,
    queue_wait_samples: u64,
    connection_ms: u64,
    connection_samples: u64,
}

impl PoolCounters {
    pub fn record_wait(&mut self, waited: Duration) {
        self.queue_wait_ms = self.queue_wait_ms.saturating_add(duration_millis(waited));
        self.queue_wait_samples += 1;
    }

    pub fn record_lifetime(&mut self, held: Duration) {
        self.connection_ms = self.connection_ms.saturating_add(duration_millis(held));
        self.connection_samples += 1;
    }

    pub fn avg_queue_wait_ms(&self) -> f64 {
        average(self.queue_wait_ms, self.queue_wait_samples)
    }

    pub fn avg_connection_duration_ms(&self) -> f64 {
        average(self.connection_ms, self.connection_samples)
    }
}

fn average(sum: u64, samples: u64) -> f64 {
    if samples == 0 {
        0.0
    } else {
        sum as f64 / samples as f64
    }
}

/// Snapshot of the pool returned by `get_stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Reservations currently held
    pub active_connections: usize,
    /// Connection attempts in flight
    pub connecting: usize,
    pub max_connections: usize,
    /// Requests waiting for a slot
    pub queue_length: usize,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_failed: u64,
    pub total_timeout: u64,
    /// Mean time from request to granted slot
    pub avg_queue_wait_ms: f64,
    /// Mean lifetime of released reservations
    pub avg_connection_duration_ms: f64,
    /// Ids holding a reservation, sorted
    pub active_connection_ids: Vec<ConnectionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_averages_start_at_zero() {
        let counters = PoolCounters::default();
        assert_eq!(counters.avg_queue_wait_ms(), 0.0);
        assert_eq!(counters.avg_connection_duration_ms(), 0.0);
    }

    #[test]
    fn test_averages_from_running_sums() {
        let mut counters = PoolCounters::default();
        counters.record_wait(Duration::from_millis(100));
        counters.record_wait(Duration::from_millis(300));
        counters.record_lifetime(Duration::from_secs(2));

        assert_eq!(counters.avg_queue_wait_ms(), 200.0);
        assert_eq!(counters.avg_connection_duration_ms(), 2000.0);
    }
}
