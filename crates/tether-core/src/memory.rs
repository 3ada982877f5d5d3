//! In-process transport with scripted behaviour
//!
//! [`MemoryTransport`] keeps every link in memory and lets callers decide,
//! per id, how connection attempts and heartbeats behave. It also records
//! every call it receives so tests can assert on ordering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::traits::{Transport, HEARTBEAT_MESSAGE};
use crate::types::{ConnectionId, TransportStatus};

/// How a connection attempt plays out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Report `connected` after the given delay
    Succeed { after: Duration },
    /// Report `error` straight away
    Fail { reason: String },
    /// Stay `connecting` forever
    Hang,
}

/// How a heartbeat is answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Reply,
    Fail(String),
    Hang,
}

/// Scripted behaviour for one id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPlan {
    pub connect: ConnectOutcome,
    pub heartbeat: HeartbeatOutcome,
}

impl Default for LinkPlan {
    fn default() -> Self {
        Self {
            connect: ConnectOutcome::Succeed {
                after: Duration::ZERO,
            },
            heartbeat: HeartbeatOutcome::Reply,
        }
    }
}

impl LinkPlan {
    /// Connects after `delay` and answers heartbeats
    pub fn connect_after(delay: Duration) -> Self {
        Self {
            connect: ConnectOutcome::Succeed { after: delay },
            ..Self::default()
        }
    }

    /// Every connection attempt fails with `reason`
    pub fn refuse(reason: impl Into<String>) -> Self {
        Self {
            connect: ConnectOutcome::Fail {
                reason: reason.into(),
            },
            ..Self::default()
        }
    }

    /// Connection attempts never complete
    pub fn hang() -> Self {
        Self {
            connect: ConnectOutcome::Hang,
            ..Self::default()
        }
    }

    /// Connects but fails every heartbeat with `reason`
    pub fn unresponsive(reason: impl Into<String>) -> Self {
        Self {
            heartbeat: HeartbeatOutcome::Fail(reason.into()),
            ..Self::default()
        }
    }

    /// Connects but never answers heartbeats
    pub fn silent() -> Self {
        Self {
            heartbeat: HeartbeatOutcome::Hang,
            ..Self::default()
        }
    }
}

/// A call received by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect(ConnectionId),
    Disconnect(ConnectionId),
    Send {
        id: ConnectionId,
        message_type: String,
    },
}

#[derive(Debug, Clone)]
struct Link {
    status: TransportStatus,
    client: bool,
    last_error: Option<String>,
    /// Bumped on every connect/disconnect so stale delayed completions are ignored
    generation: u64,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            status: TransportStatus::Disconnected,
            client: false,
            last_error: None,
            generation: 0,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    links: DashMap<ConnectionId, Link>,
    plans: DashMap<ConnectionId, LinkPlan>,
    default_plan: Mutex<LinkPlan>,
    calls: Mutex<Vec<TransportCall>>,
}

impl MemoryState {
    fn plan_for(&self, id: &ConnectionId) -> LinkPlan {
        self.plans
            .get(id)
            .map(|plan| plan.clone())
            .unwrap_or_else(|| self.default_plan.lock().clone())
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().push(call);
    }
}

/// Transport backed by in-memory state
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryState>,
}

impl MemoryTransport {
    /// Create a transport where every id connects instantly and answers heartbeats
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose unscripted ids follow `plan`
    pub fn with_default_plan(plan: LinkPlan) -> Self {
        let transport = Self::new();
        *transport.inner.default_plan.lock() = plan;
        transport
    }

    /// Script the behaviour of `id`
    pub fn set_plan(&self, id: impl Into<ConnectionId>, plan: LinkPlan) {
        self.inner.plans.insert(id.into(), plan);
    }

    /// Change only the heartbeat behaviour of `id`
    pub fn set_heartbeat(&self, id: impl Into<ConnectionId>, heartbeat: HeartbeatOutcome) {
        let id = id.into();
        let mut plan = self.inner.plan_for(&id);
        plan.heartbeat = heartbeat;
        self.inner.plans.insert(id, plan);
    }

    /// Drop the link as if the remote end went away
    pub fn sever(&self, id: &ConnectionId) {
        let mut link = self.inner.links.entry(id.clone()).or_default();
        link.status = TransportStatus::Error;
        link.client = false;
        link.last_error = Some("connection severed".to_string());
        link.generation += 1;
    }

    /// Lose the client handle while the status still reads `connected`
    pub fn drop_client(&self, id: &ConnectionId) {
        if let Some(mut link) = self.inner.links.get_mut(id) {
            link.client = false;
        }
    }

    /// Every call received so far, oldest first
    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.calls.lock().clone()
    }

    /// Ids in the order their connections were requested
    pub fn connect_order(&self) -> Vec<ConnectionId> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                TransportCall::Connect(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of connect calls for `id`
    pub fn connect_count(&self, id: &ConnectionId) -> usize {
        self.count(|call| matches!(call, TransportCall::Connect(c) if c == id))
    }

    /// Number of disconnect calls for `id`
    pub fn disconnect_count(&self, id: &ConnectionId) -> usize {
        self.count(|call| matches!(call, TransportCall::Disconnect(c) if c == id))
    }

    /// Number of heartbeats sent to `id`
    pub fn heartbeat_count(&self, id: &ConnectionId) -> usize {
        self.count(|call| {
            matches!(call, TransportCall::Send { id: c, message_type } if c == id && message_type == HEARTBEAT_MESSAGE)
        })
    }

    /// Ids currently reporting `connected`
    pub fn connected_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .inner
            .links
            .iter()
            .filter(|entry| entry.status == TransportStatus::Connected)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    fn count<F>(&self, pred: F) -> usize
    where
        F: Fn(&TransportCall) -> bool,
    {
        self.inner.calls.lock().iter().filter(|call| pred(call)).count()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, id: &ConnectionId) -> Result<(), TransportError> {
        self.inner.record(TransportCall::Connect(id.clone()));
        let plan = self.inner.plan_for(id);

        let generation = {
            let mut link = self.inner.links.entry(id.clone()).or_default();
            link.generation += 1;
            link.client = false;
            link.last_error = None;
            link.status = TransportStatus::Connecting;
            link.generation
        };

        match plan.connect {
            ConnectOutcome::Succeed { after } if after.is_zero() => {
                if let Some(mut link) = self.inner.links.get_mut(id) {
                    link.status = TransportStatus::Connected;
                    link.client = true;
                }
            }
            ConnectOutcome::Succeed { after } => {
                let state = Arc::clone(&self.inner);
                let id = id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    if let Some(mut link) = state.links.get_mut(&id) {
                        if link.generation == generation && link.status == TransportStatus::Connecting {
                            link.status = TransportStatus::Connected;
                            link.client = true;
                        }
                    }
                });
            }
            ConnectOutcome::Fail { reason } => {
                if let Some(mut link) = self.inner.links.get_mut(id) {
                    link.status = TransportStatus::Error;
                    link.last_error = Some(reason);
                }
            }
            ConnectOutcome::Hang => {}
        }

        Ok(())
    }

    fn status(&self, id: &ConnectionId) -> TransportStatus {
        self.inner
            .links
            .get(id)
            .map(|link| link.status)
            .unwrap_or(TransportStatus::Disconnected)
    }

    fn has_client(&self, id: &ConnectionId) -> bool {
        self.inner.links.get(id).map(|link| link.client).unwrap_or(false)
    }

    async fn disconnect(&self, id: &ConnectionId) -> Result<(), TransportError> {
        self.inner.record(TransportCall::Disconnect(id.clone()));
        if let Some(mut link) = self.inner.links.get_mut(id) {
            link.generation += 1;
            link.status = TransportStatus::Disconnected;
            link.client = false;
        }
        Ok(())
    }

    async fn send_message(
        &self,
        id: &ConnectionId,
        message_type: &str,
        _payload: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.inner.record(TransportCall::Send {
            id: id.clone(),
            message_type: message_type.to_string(),
        });

        if self.status(id) != TransportStatus::Connected || !self.has_client(id) {
            return Err(TransportError::NotConnected(id.clone()));
        }

        match self.inner.plan_for(id).heartbeat {
            HeartbeatOutcome::Reply => Ok(json!({ "type": message_type, "ok": true })),
            HeartbeatOutcome::Fail(reason) => Err(TransportError::Remote(reason)),
            HeartbeatOutcome::Hang => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout(timeout))
            }
        }
    }

    fn last_error(&self, id: &ConnectionId) -> Option<String> {
        self.inner.links.get(id).and_then(|link| link.last_error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    #[tokio::test]
    async fn test_instant_connect_and_disconnect() {
        let transport = MemoryTransport::new();
        let a = id("a");

        assert_eq!(transport.status(&a), TransportStatus::Disconnected);
        transport.connect(&a).await.unwrap();
        assert_eq!(transport.status(&a), TransportStatus::Connected);
        assert!(transport.has_client(&a));

        transport.disconnect(&a).await.unwrap();
        assert_eq!(transport.status(&a), TransportStatus::Disconnected);
        assert!(!transport.has_client(&a));
        assert_eq!(transport.connect_count(&a), 1);
        assert_eq!(transport.disconnect_count(&a), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_connect() {
        let transport = MemoryTransport::new();
        let a = id("a");
        transport.set_plan("a", LinkPlan::connect_after(Duration::from_millis(250)));

        transport.connect(&a).await.unwrap();
        assert_eq!(transport.status(&a), TransportStatus::Connecting);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.status(&a), TransportStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_connect() {
        let transport = MemoryTransport::new();
        let a = id("a");
        transport.set_plan("a", LinkPlan::connect_after(Duration::from_millis(250)));

        transport.connect(&a).await.unwrap();
        transport.disconnect(&a).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.status(&a), TransportStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_refused_connect_reports_error() {
        let transport = MemoryTransport::new();
        let a = id("a");
        transport.set_plan("a", LinkPlan::refuse("auth rejected"));

        transport.connect(&a).await.unwrap();
        assert_eq!(transport.status(&a), TransportStatus::Error);
        assert_eq!(transport.last_error(&a).as_deref(), Some("auth rejected"));
    }

    #[tokio::test]
    async fn test_heartbeat_outcomes() {
        let transport = MemoryTransport::new();
        let a = id("a");
        let timeout = Duration::from_millis(50);

        let err = transport
            .send_message(&a, HEARTBEAT_MESSAGE, json!({}), timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(_)));

        transport.connect(&a).await.unwrap();
        assert!(transport
            .send_message(&a, HEARTBEAT_MESSAGE, json!({}), timeout)
            .await
            .is_ok());

        transport.set_heartbeat("a", HeartbeatOutcome::Fail("boom".into()));
        let err = transport
            .send_message(&a, HEARTBEAT_MESSAGE, json!({}), timeout)
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Remote("boom".into()));
        assert_eq!(transport.heartbeat_count(&a), 3);
    }

    #[tokio::test]
    async fn test_sever_and_drop_client() {
        let transport = MemoryTransport::new();
        let a = id("a");
        let b = id("b");
        transport.connect(&a).await.unwrap();
        transport.connect(&b).await.unwrap();
        assert_eq!(transport.connected_ids(), vec![a.clone(), b.clone()]);
        assert_eq!(transport.connect_order(), vec![a.clone(), b.clone()]);

        transport.sever(&a);
        assert_eq!(transport.status(&a), TransportStatus::Error);

        transport.drop_client(&b);
        assert_eq!(transport.status(&b), TransportStatus::Connected);
        assert!(!transport.has_client(&b));
    }
}
