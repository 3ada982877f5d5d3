//! tether-core: Core abstractions and configuration for tether
//!
//! This crate provides the identifiers, error taxonomy, configuration
//! structures, priority queue and transport trait shared by the
//! connection pool, the health monitor and the task scheduler.

pub mod background;
pub mod config;
pub mod error;
pub mod memory;
pub mod queue;
pub mod time;
pub mod traits;
pub mod types;

pub use background::BackgroundLoop;
pub use config::TetherConfig;
pub use memory::MemoryTransport;
pub use queue::PriorityQueue;
pub use traits::{Transport, HEARTBEAT_MESSAGE};
pub use types::{ConnectionId, Priority, TaskId, TransportStatus};
