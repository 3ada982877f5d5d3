//! Connection admission and queueing

mod slot_pool;
mod stats;

pub use slot_pool::{CleanupReport, ConnectionSlotPool, Reservation};
pub use stats::PoolStats;
