//! Health check records, events and report types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use tether_core::ConnectionId;

use crate::pool::PoolStats;

/// Latest probe outcome for one id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub healthy: bool,
    /// Why the connection was judged unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the probe finished (ms since epoch)
    pub timestamp: u64,
}

impl HealthRecord {
    pub(crate) fn no_data() -> Self {
        Self {
            healthy: false,
            reason: Some("no data".to_string()),
            timestamp: 0,
        }
    }
}

/// Tally of one `check_all_connections` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub timestamp: u64,
    pub healthy: usize,
    pub unhealthy: usize,
    pub total: usize,
}

/// Kind of reconnect event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventKind {
    /// The pool handed the slot back after a reconnect
    ReconnectSuccess,
    /// The transport refused or timed out
    ReconnectFailed,
    /// The pool rejected the request for another reason
    ReconnectError,
    /// The id used up its reconnect budget
    ReconnectAbandoned,
}

impl HealthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthEventKind::ReconnectSuccess => "reconnect_success",
            HealthEventKind::ReconnectFailed => "reconnect_failed",
            HealthEventKind::ReconnectError => "reconnect_error",
            HealthEventKind::ReconnectAbandoned => "reconnect_abandoned",
        }
    }
}

impl fmt::Display for HealthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry in the monitor's event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub timestamp: u64,
    pub id: ConnectionId,
    pub kind: HealthEventKind,
    /// Reconnect cycle the event belongs to
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Monitor counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub is_active: bool,
    pub check_interval_ms: u64,
    pub total_checks: u64,
    pub total_healthy: u64,
    pub total_unhealthy: u64,
    pub total_reconnects: u64,
    pub total_reconnect_failures: u64,
    /// Healthy probes as a percentage of all probes; `None` before the first probe
    pub health_rate: Option<f64>,
}

/// Combined monitor and pool statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub monitoring: MonitoringSummary,
    pub pool: PoolStats,
    /// Most recent check passes, oldest first
    pub recent_checks: Vec<CheckSummary>,
    /// Most recent reconnect events, oldest first
    pub recent_events: Vec<HealthEvent>,
}

/// Per-connection health view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: u64,
    /// Ids currently holding a pool reservation
    pub total_connections: usize,
    /// Stored records that are healthy
    pub healthy_connections: usize,
    /// Stored records that are unhealthy
    pub unhealthy_connections: usize,
    /// Latest record for every active id
    pub detailed_health: BTreeMap<ConnectionId, HealthRecord>,
    pub stats: MonitorStats,
}
