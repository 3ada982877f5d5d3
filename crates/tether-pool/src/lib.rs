//! tether-pool: Connection admission control and health monitoring
//!
//! [`ConnectionSlotPool`] caps how many transport connections are open at
//! once and queues the excess by priority. [`HealthMonitor`] probes the
//! connections the pool holds and recycles the ones that stop answering.

pub mod health;
pub mod pool;

pub use health::{HealthEventKind, HealthMonitor, HealthReport, MonitorStats};
pub use pool::{CleanupReport, ConnectionSlotPool, PoolStats, Reservation};
