//! Connection health monitoring
//!
//! The monitor periodically probes every connection the pool holds. A
//! connection is healthy only when the transport reports it connected, a
//! client handle exists, and a heartbeat round-trip completes within
//! `health_timeout`.
//!
//! Unhealthy ids go through a bounded reconnect cycle: release the slot,
//! wait `reconnect_delay`, then re-acquire it at an elevated priority. The
//! cycle does not verify the new connection itself; the next check pass
//! does, and only a healthy probe resets the id's reconnect counter. Once an
//! id has used `max_reconnect_attempts` cycles, further failures are logged
//! as abandoned and left alone.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

use tether_core::config::MonitorConfig;
use tether_core::error::{ConfigError, HealthError, TransportError};
use tether_core::time::{current_time_millis, duration_millis};
use tether_core::{BackgroundLoop, ConnectionId, Transport, TransportStatus, HEARTBEAT_MESSAGE};

use super::record::{
    CheckSummary, HealthEvent, HealthEventKind, HealthRecord, HealthReport, MonitorStats,
    MonitoringSummary,
};
use crate::pool::ConnectionSlotPool;

const RECENT_CHECKS: usize = 10;
const RECENT_EVENTS: usize = 20;

#[derive(Debug, Default)]
struct MonitorCounters {
    total_checks: u64,
    total_healthy: u64,
    total_unhealthy: u64,
    total_reconnects: u64,
    total_reconnect_failures: u64,
}

#[derive(Debug, Default)]
struct MonitorState {
    records: HashMap<ConnectionId, (HealthRecord, Instant)>,
    reconnect_attempts: HashMap<ConnectionId, u32>,
    counters: MonitorCounters,
    history: VecDeque<CheckSummary>,
    events: VecDeque<(HealthEvent, Instant)>,
}

struct MonitorInner {
    config: MonitorConfig,
    pool: ConnectionSlotPool,
    transport: Arc<dyn Transport>,
    state: Mutex<MonitorState>,
    /// Serializes check passes, scheduled or manual
    checking: tokio::sync::Mutex<()>,
    ticker: Mutex<Option<BackgroundLoop>>,
}

/// Periodic liveness checks with bounded auto-reconnect
///
/// Cloning is cheap; clones share the same monitor.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.inner.config)
            .field("monitoring", &self.is_monitoring())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create a monitor for `pool`, probing through `transport`
    ///
    /// Fails if `config` does not pass [`MonitorConfig::validate`].
    pub fn new(
        pool: ConnectionSlotPool,
        transport: Arc<dyn Transport>,
        config: MonitorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                pool,
                transport,
                state: Mutex::new(MonitorState::default()),
                checking: tokio::sync::Mutex::new(()),
                ticker: Mutex::new(None),
            }),
        })
    }

    /// Create a monitor that probes through the pool's own transport
    pub fn for_pool(pool: ConnectionSlotPool, config: MonitorConfig) -> Result<Self, ConfigError> {
        let transport = Arc::clone(pool.transport());
        Self::new(pool, transport, config)
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start periodic checks; the first pass runs immediately
    pub fn start_monitoring(&self) {
        let mut ticker = self.inner.ticker.lock();
        if ticker.as_ref().is_some_and(BackgroundLoop::is_running) {
            tracing::debug!("Health monitoring already running");
            return;
        }

        tracing::info!(
            interval_ms = duration_millis(self.inner.config.check_interval),
            "Starting health monitoring"
        );
        *ticker = Some(BackgroundLoop::spawn(
            "health-monitor",
            self.inner.config.check_interval,
            Arc::downgrade(&self.inner),
            |inner: Arc<MonitorInner>| async move {
                HealthMonitor { inner }.check_all_connections().await;
            },
        ));
    }

    pub fn stop_monitoring(&self) {
        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.stop();
            tracing::info!("Stopped health monitoring");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .ticker
            .lock()
            .as_ref()
            .is_some_and(BackgroundLoop::is_running)
    }

    /// Probe every id the pool holds and reconnect the unhealthy ones
    pub async fn check_all_connections(&self) -> CheckSummary {
        let _pass = self.inner.checking.lock().await;

        let ids = self.inner.pool.get_stats().active_connection_ids;
        tracing::debug!(active = ids.len(), "Starting health check pass");

        let mut unhealthy = Vec::new();
        for id in &ids {
            if !self.check_health(id).await {
                unhealthy.push(id.clone());
            }
        }

        let summary = CheckSummary {
            timestamp: current_time_millis(),
            healthy: ids.len() - unhealthy.len(),
            unhealthy: unhealthy.len(),
            total: ids.len(),
        };

        {
            let mut state = self.inner.state.lock();
            state.counters.total_checks += 1;
            state.history.push_back(summary);
            while state.history.len() > self.inner.config.history_capacity {
                state.history.pop_front();
            }
        }

        tracing::debug!(
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            "Health check pass finished"
        );

        for id in &unhealthy {
            self.auto_reconnect(id).await;
        }

        self.prune_expired();
        summary
    }

    /// Probe one connection and record the outcome
    pub async fn check_health(&self, id: &ConnectionId) -> bool {
        let outcome = self.probe(id).await;

        let record = HealthRecord {
            healthy: outcome.is_ok(),
            reason: outcome.as_ref().err().map(ToString::to_string),
            timestamp: current_time_millis(),
        };

        match &outcome {
            Ok(()) => tracing::debug!(id = %id, "Connection healthy"),
            Err(reason) => tracing::warn!(id = %id, reason = %reason, "Connection unhealthy"),
        }

        let mut state = self.inner.state.lock();
        if record.healthy {
            state.counters.total_healthy += 1;
            state.reconnect_attempts.remove(id);
        } else {
            state.counters.total_unhealthy += 1;
        }
        let healthy = record.healthy;
        state.records.insert(id.clone(), (record, Instant::now()));
        healthy
    }

    async fn probe(&self, id: &ConnectionId) -> Result<(), HealthError> {
        let transport = &self.inner.transport;
        let timeout = self.inner.config.health_timeout;

        let status = transport.status(id);
        if status != TransportStatus::Connected {
            return Err(HealthError::NotConnected(status));
        }
        if !transport.has_client(id) {
            return Err(HealthError::NoClient);
        }

        let heartbeat = transport.send_message(id, HEARTBEAT_MESSAGE, json!({}), timeout);
        match tokio::time::timeout(timeout, heartbeat).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(TransportError::Timeout(waited))) => Err(HealthError::HeartbeatTimeout(waited)),
            Ok(Err(e)) => Err(HealthError::HeartbeatFailed(e.to_string())),
            Err(_) => Err(HealthError::HeartbeatTimeout(timeout)),
        }
    }

    /// Run one reconnect cycle for `id`, unless its budget is spent
    pub async fn auto_reconnect(&self, id: &ConnectionId) -> bool {
        let attempt = {
            let mut state = self.inner.state.lock();
            let attempts = state.reconnect_attempts.get(id).copied().unwrap_or(0);
            if attempts >= self.inner.config.max_reconnect_attempts {
                None
            } else {
                state.reconnect_attempts.insert(id.clone(), attempts + 1);
                state.counters.total_reconnects += 1;
                Some(attempts + 1)
            }
        };

        let Some(attempt) = attempt else {
            let attempts = self.inner.config.max_reconnect_attempts;
            tracing::warn!(id = %id, attempts, "Reconnect attempts exhausted, giving up");
            self.record_event(id, HealthEventKind::ReconnectAbandoned, attempts, None);
            return false;
        };

        tracing::info!(id = %id, attempt, "Reconnecting");

        self.inner.pool.release(id, true).await;
        tokio::time::sleep(self.inner.config.reconnect_delay).await;

        match self
            .inner
            .pool
            .reserve(id, self.inner.config.reconnect_priority)
            .await
        {
            Ok(()) => {
                tracing::info!(id = %id, attempt, "Reconnected, awaiting next health check");
                self.record_event(id, HealthEventKind::ReconnectSuccess, attempt, None);
                true
            }
            Err(e) => {
                let kind = if e.is_connect_failure() {
                    HealthEventKind::ReconnectFailed
                } else {
                    HealthEventKind::ReconnectError
                };
                tracing::warn!(id = %id, attempt, error = %e, "Reconnect failed");
                self.inner.state.lock().counters.total_reconnect_failures += 1;
                self.record_event(id, kind, attempt, Some(e.to_string()));
                false
            }
        }
    }

    fn record_event(&self, id: &ConnectionId, kind: HealthEventKind, attempts: u32, error: Option<String>) {
        let event = HealthEvent {
            timestamp: current_time_millis(),
            id: id.clone(),
            kind,
            attempts,
            error,
        };

        let mut state = self.inner.state.lock();
        state.events.push_back((event, Instant::now()));
        while state.events.len() > self.inner.config.event_capacity {
            state.events.pop_front();
        }
    }

    fn prune_expired(&self) {
        let retention = self.inner.config.stats_retention_time;
        let mut state = self.inner.state.lock();
        state.records.retain(|_, (_, at)| at.elapsed() <= retention);
        state.events.retain(|(_, at)| at.elapsed() <= retention);
    }

    /// Current reconnect counter for `id`
    pub fn reconnect_attempts(&self, id: &ConnectionId) -> u32 {
        self.inner
            .state
            .lock()
            .reconnect_attempts
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Latest probe outcome for `id`
    pub fn health_record(&self, id: &ConnectionId) -> Option<HealthRecord> {
        self.inner
            .state
            .lock()
            .records
            .get(id)
            .map(|(record, _)| record.clone())
    }

    /// Every event still in the log, oldest first
    pub fn events(&self) -> Vec<HealthEvent> {
        self.inner
            .state
            .lock()
            .events
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    /// Monitor counters plus a pool snapshot
    pub fn collect_stats(&self) -> MonitorStats {
        let pool = self.inner.pool.get_stats();
        let is_active = self.is_monitoring();
        let state = self.inner.state.lock();
        let counters = &state.counters;

        let probes = counters.total_healthy + counters.total_unhealthy;
        let health_rate = (probes > 0).then(|| counters.total_healthy as f64 / probes as f64 * 100.0);

        MonitorStats {
            monitoring: MonitoringSummary {
                is_active,
                check_interval_ms: duration_millis(self.inner.config.check_interval),
                total_checks: counters.total_checks,
                total_healthy: counters.total_healthy,
                total_unhealthy: counters.total_unhealthy,
                total_reconnects: counters.total_reconnects,
                total_reconnect_failures: counters.total_reconnect_failures,
                health_rate,
            },
            pool,
            recent_checks: tail(state.history.iter().copied(), state.history.len(), RECENT_CHECKS),
            recent_events: tail(
                state.events.iter().map(|(event, _)| event.clone()),
                state.events.len(),
                RECENT_EVENTS,
            ),
        }
    }

    /// Latest health of every id the pool holds
    pub fn get_health_report(&self) -> HealthReport {
        let stats = self.collect_stats();
        let state = self.inner.state.lock();

        let detailed_health: BTreeMap<ConnectionId, HealthRecord> = stats
            .pool
            .active_connection_ids
            .iter()
            .map(|id| {
                let record = state
                    .records
                    .get(id)
                    .map(|(record, _)| record.clone())
                    .unwrap_or_else(HealthRecord::no_data);
                (id.clone(), record)
            })
            .collect();

        let healthy_connections = state.records.values().filter(|(r, _)| r.healthy).count();
        let unhealthy_connections = state.records.len() - healthy_connections;
        drop(state);

        HealthReport {
            timestamp: current_time_millis(),
            total_connections: stats.pool.active_connection_ids.len(),
            healthy_connections,
            unhealthy_connections,
            detailed_health,
            stats,
        }
    }

    /// Clear counters, history, health records and reconnect counters
    pub fn reset_stats(&self) {
        *self.inner.state.lock() = MonitorState::default();
        tracing::info!("Health statistics reset");
    }
}

fn tail<T>(items: impl Iterator<Item = T>, len: usize, keep: usize) -> Vec<T> {
    items.skip(len.saturating_sub(keep)).collect()
}
