//! Connection health monitoring and auto-reconnect

mod monitor;
mod record;

pub use monitor::HealthMonitor;
pub use record::{
    CheckSummary, HealthEvent, HealthEventKind, HealthRecord, HealthReport, MonitorStats,
    MonitoringSummary,
};
