//! Core trait definitions

mod transport;

pub use transport::{Transport, HEARTBEAT_MESSAGE};
