//! Core error types for tether

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{ConnectionId, TaskId, TransportStatus};

/// Errors reported by a transport provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport refused to start a connection
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// No open connection for this id
    #[error("Not connected: {0}")]
    NotConnected(ConnectionId),

    /// The peer did not answer in time
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The peer answered with an error
    #[error("Remote error: {0}")]
    Remote(String),

    /// The underlying connection was closed
    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Connection pool errors
///
/// These never escape the pool's boolean `acquire`; they are surfaced by
/// `reserve` and recorded in logs and statistics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The transport did not report `connected` before the deadline
    #[error("Connection timeout for {id} after {timeout:?}")]
    ConnectionTimeout {
        id: ConnectionId,
        timeout: Duration,
    },

    /// The transport reported an error while connecting
    #[error("Connection error for {id}: {reason}")]
    Connection { id: ConnectionId, reason: String },

    /// The request waited in the admission queue for too long
    #[error("Queue timeout for {id} after {waited:?}")]
    QueueTimeout { id: ConnectionId, waited: Duration },

    /// Another connection attempt for the same id is in flight
    #[error("Connection already being created: {0}")]
    CreationInProgress(ConnectionId),

    /// The id was released while its connection was being created
    #[error("Released while connecting: {0}")]
    ReleasedWhileConnecting(ConnectionId),

    /// The wait queue was cleared before this request was served
    #[error("Removed from queue: {0}")]
    QueueClosed(ConnectionId),

    /// The pool has been shut down
    #[error("Connection pool is shut down")]
    ShutDown,
}

impl PoolError {
    /// Whether the error came from the transport refusing or timing out,
    /// as opposed to pool bookkeeping.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            PoolError::ConnectionTimeout { .. }
                | PoolError::Connection { .. }
                | PoolError::QueueTimeout { .. }
        )
    }
}

/// Reasons a connection is judged unhealthy
///
/// The `Display` form is the reason string stored in health records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HealthError {
    /// Transport does not report the connection as open
    #[error("status: {0}")]
    NotConnected(TransportStatus),

    /// Transport has no client handle for the id
    #[error("no client")]
    NoClient,

    /// The heartbeat did not complete in time
    #[error("heartbeat failed: timed out after {0:?}")]
    HeartbeatTimeout(Duration),

    /// The heartbeat was answered with an error
    #[error("heartbeat failed: {0}")]
    HeartbeatFailed(String),
}

/// Outcome of a failed task attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task did not finish within the deadline
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),

    /// The task body returned an error
    #[error("{0}")]
    Failed(String),

    /// The task body panicked
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled
    #[error("Task cancelled")]
    Cancelled,

    /// A queued, running or retrying task already uses this id
    #[error("Task id already in use: {0}")]
    DuplicateId(TaskId),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
