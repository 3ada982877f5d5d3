//! Transport traits

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::TransportError;
use crate::types::{ConnectionId, TransportStatus};

/// Message type used for liveness probes
pub const HEARTBEAT_MESSAGE: &str = "heart_beat";

/// Abstraction over the provider that owns the actual connections
///
/// The pool and the health monitor only ever talk to connections through
/// this trait. Implementations must be cheap to call concurrently for
/// different ids.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start opening a connection for `id`
    ///
    /// Returns once the attempt has been kicked off; establishment is
    /// observed through [`Transport::status`].
    async fn connect(&self, id: &ConnectionId) -> Result<(), TransportError>;

    /// Current connection status
    fn status(&self, id: &ConnectionId) -> TransportStatus;

    /// Whether a live client handle exists for `id`
    fn has_client(&self, id: &ConnectionId) -> bool;

    /// Tear down the connection for `id`
    async fn disconnect(&self, id: &ConnectionId) -> Result<(), TransportError>;

    /// Send a message and wait for its reply
    async fn send_message(
        &self,
        id: &ConnectionId,
        message_type: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    /// Last error the provider recorded for `id`, if any
    fn last_error(&self, _id: &ConnectionId) -> Option<String> {
        None
    }
}
