//! Connection slot pool
//!
//! Admission control over a fixed number of transport connections. Callers
//! ask for a slot by id; when every slot is taken the request waits in a
//! priority queue until a slot is freed, the queue deadline passes, or the
//! pool shuts down.
//!
//! # Slot accounting
//!
//! A slot is occupied by an established reservation *or* by a connection
//! attempt in flight, so `active + connecting` never exceeds
//! `max_connections`. Admission and the creation lock are taken together
//! under the state mutex. While anyone is queued, new requests queue too,
//! so a freed slot always goes to the highest-priority waiter.
//!
//! # Creation locks
//!
//! At most one connection attempt runs per id. Each lock carries an epoch;
//! releasing an id while it is still connecting revokes the lock, and the
//! attempt then tears its connection down instead of registering it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;

use tether_core::config::PoolConfig;
use tether_core::error::{ConfigError, PoolError};
use tether_core::time::{current_time_millis, duration_millis};
use tether_core::types::ReservationStatus;
use tether_core::{BackgroundLoop, ConnectionId, Priority, PriorityQueue, Transport, TransportStatus};

use super::stats::{PoolCounters, PoolStats};

/// A logical claim by one id on one connection slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ConnectionId,
    /// When the slot was claimed (ms since epoch)
    pub acquired_at: u64,
    /// Last time the reservation was handed out (ms since epoch)
    pub last_used_at: u64,
    pub status: ReservationStatus,
}

/// What a cleanup pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Reservations released for being idle too long
    pub evicted: Vec<ConnectionId>,
    /// Queued requests rejected for waiting too long
    pub expired_waiters: Vec<ConnectionId>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.expired_waiters.is_empty()
    }
}

struct Slot {
    reservation: Reservation,
    acquired: Instant,
    last_used: Instant,
}

impl Slot {
    fn new(id: ConnectionId) -> Self {
        let now = current_time_millis();
        Self {
            reservation: Reservation {
                id,
                acquired_at: now,
                last_used_at: now,
                status: ReservationStatus::Connected,
            },
            acquired: Instant::now(),
            last_used: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
        self.reservation.last_used_at = current_time_millis();
    }
}

struct CreationLock {
    epoch: u64,
    started: Instant,
    started_at: u64,
}

struct Waiter {
    ticket: u64,
    id: ConnectionId,
    priority: Priority,
    /// When the caller first asked for the slot
    requested: Instant,
    reply: oneshot::Sender<Result<(), PoolError>>,
}

#[derive(Default)]
struct PoolState {
    active: HashMap<ConnectionId, Slot>,
    creating: HashMap<ConnectionId, CreationLock>,
    queue: PriorityQueue<Waiter>,
    counters: PoolCounters,
    next_ticket: u64,
    next_epoch: u64,
    shut_down: bool,
}

impl PoolState {
    fn occupied(&self) -> usize {
        self.active.len() + self.creating.len()
    }

    fn lock_creation(&mut self, id: &ConnectionId) -> u64 {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        self.creating.insert(
            id.clone(),
            CreationLock {
                epoch,
                started: Instant::now(),
                started_at: current_time_millis(),
            },
        );
        epoch
    }

    fn holds_creation(&self, id: &ConnectionId, epoch: u64) -> bool {
        self.creating.get(id).map(|lock| lock.epoch) == Some(epoch)
    }

    /// Forget an active slot, keeping lifetime statistics
    fn take_slot(&mut self, id: &ConnectionId) -> Option<Slot> {
        let slot = self.active.remove(id)?;
        self.counters.total_released += 1;
        self.counters.record_lifetime(slot.acquired.elapsed());
        Some(slot)
    }
}

struct PoolInner {
    config: PoolConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<PoolState>,
    /// Held by whichever task is draining the wait queue
    draining: tokio::sync::Mutex<()>,
    cleanup: Mutex<Option<BackgroundLoop>>,
}

/// Frees the creation lock if the attempt ends without registering
struct CreationGuard<'a> {
    inner: &'a PoolInner,
    id: &'a ConnectionId,
    epoch: u64,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.holds_creation(self.id, self.epoch) {
            state.creating.remove(self.id);
        }
    }
}

enum Admission {
    Reused,
    Stale(TransportStatus),
    Create(u64),
    Queued {
        ticket: u64,
        reply: oneshot::Receiver<Result<(), PoolError>>,
    },
    Rejected(PoolError),
}

/// Bounded pool of connection slots keyed by id
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct ConnectionSlotPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ConnectionSlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionSlotPool")
            .field("max_connections", &self.inner.config.max_connections)
            .field("active", &state.active.len())
            .field("connecting", &state.creating.len())
            .field("queued", &state.queue.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionSlotPool {
    /// Create a pool over `transport`
    ///
    /// Fails if `config` does not pass [`PoolConfig::validate`].
    pub fn new(transport: Arc<dyn Transport>, config: PoolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                transport,
                state: Mutex::new(PoolState::default()),
                draining: tokio::sync::Mutex::new(()),
                cleanup: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Obtain a slot for `id`, returning whether the connection is usable
    ///
    /// Failures are logged and counted; use [`ConnectionSlotPool::reserve`]
    /// to learn the reason.
    pub async fn acquire(&self, id: &ConnectionId, priority: Priority) -> bool {
        match self.reserve(id, priority).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(id = %id, error = %e, "Acquire failed");
                false
            }
        }
    }

    /// Obtain a slot for `id`
    ///
    /// Reuses a healthy existing reservation, connects straight away when a
    /// slot is free, and otherwise waits in the queue at `priority`.
    pub async fn reserve(&self, id: &ConnectionId, priority: Priority) -> Result<(), PoolError> {
        let requested = Instant::now();

        loop {
            match self.admit(id, priority) {
                Admission::Reused => {
                    tracing::debug!(id = %id, "Reusing healthy connection");
                    return Ok(());
                }
                Admission::Stale(status) => {
                    tracing::info!(id = %id, status = %status, "Existing connection unhealthy, releasing");
                    self.release(id, true).await;
                }
                Admission::Create(epoch) => {
                    let result = self.create_connection(id, epoch).await;
                    self.record_outcome(&result, requested);
                    if result.is_err() {
                        self.kick_queue();
                    }
                    return result;
                }
                Admission::Queued { ticket, reply } => {
                    self.kick_queue();
                    return self.wait_in_queue(id, ticket, reply, requested).await;
                }
                Admission::Rejected(e) => return Err(e),
            }
        }
    }

    fn admit(&self, id: &ConnectionId, priority: Priority) -> Admission {
        // Queried before locking: transport code must not run under the state mutex.
        let status = self.inner.transport.status(id);
        let mut state = self.inner.state.lock();

        if state.shut_down {
            return Admission::Rejected(PoolError::ShutDown);
        }

        if let Some(slot) = state.active.get_mut(id) {
            if status == TransportStatus::Connected {
                slot.touch();
                return Admission::Reused;
            }
            return Admission::Stale(status);
        }

        if state.creating.contains_key(id) {
            state.counters.total_failed += 1;
            tracing::debug!(id = %id, "Connection already being created");
            return Admission::Rejected(PoolError::CreationInProgress(id.clone()));
        }

        // A free slot goes to the queue head first; newcomers only bypass an empty queue.
        if state.queue.is_empty() && state.occupied() < self.inner.config.max_connections {
            return Admission::Create(state.lock_creation(id));
        }

        let (tx, rx) = oneshot::channel();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let position = state.queue.push(
            Waiter {
                ticket,
                id: id.clone(),
                priority,
                requested: Instant::now(),
                reply: tx,
            },
            priority,
        );
        tracing::debug!(
            id = %id,
            priority,
            position,
            queue_length = state.queue.len(),
            occupied = state.occupied(),
            "Request queued"
        );

        Admission::Queued { ticket, reply: rx }
    }

    async fn wait_in_queue(
        &self,
        id: &ConnectionId,
        ticket: u64,
        mut reply: oneshot::Receiver<Result<(), PoolError>>,
        requested: Instant,
    ) -> Result<(), PoolError> {
        match tokio::time::timeout(self.inner.config.queue_timeout, &mut reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PoolError::QueueClosed(id.clone())),
            Err(_) => {
                let expired = {
                    let mut state = self.inner.state.lock();
                    let removed = state.queue.remove_first(|w| w.ticket == ticket);
                    if removed.is_some() {
                        state.counters.total_timeout += 1;
                    }
                    removed.is_some()
                };

                if expired {
                    let waited = requested.elapsed();
                    tracing::warn!(id = %id, waited_ms = duration_millis(waited), "Queue wait timed out");
                    return Err(PoolError::QueueTimeout {
                        id: id.clone(),
                        waited,
                    });
                }

                // Already picked up by the drainer; its attempt decides.
                reply
                    .await
                    .unwrap_or_else(|_| Err(PoolError::QueueClosed(id.clone())))
            }
        }
    }

    async fn create_connection(&self, id: &ConnectionId, epoch: u64) -> Result<(), PoolError> {
        let _guard = CreationGuard {
            inner: &self.inner,
            id,
            epoch,
        };
        let timeout = self.inner.config.connection_timeout;

        tracing::debug!(id = %id, "Opening connection");
        if let Err(e) = self.inner.transport.connect(id).await {
            tracing::warn!(id = %id, error = %e, "Transport refused connection");
            return Err(PoolError::Connection {
                id: id.clone(),
                reason: e.to_string(),
            });
        }

        match tokio::time::timeout(timeout, self.await_connected(id, epoch)).await {
            Ok(Ok(())) => {}
            Ok(Err(PoolError::ReleasedWhileConnecting(_))) => {
                self.abandon_revoked(id).await;
                return Err(PoolError::ReleasedWhileConnecting(id.clone()));
            }
            Ok(Err(e)) => {
                tracing::warn!(id = %id, error = %e, "Connection failed");
                return Err(e);
            }
            Err(_) => {
                let status = self.inner.transport.status(id);
                tracing::warn!(
                    id = %id,
                    status = %status,
                    timeout_ms = duration_millis(timeout),
                    "Connection timed out"
                );
                self.disconnect_quietly(id).await;
                return Err(PoolError::ConnectionTimeout {
                    id: id.clone(),
                    timeout,
                });
            }
        }

        let registered = {
            let mut state = self.inner.state.lock();
            if state.holds_creation(id, epoch) {
                let lock = state.creating.remove(id);
                state.active.insert(id.clone(), Slot::new(id.clone()));
                lock.map(|lock| lock.started.elapsed())
            } else {
                None
            }
        };

        match registered {
            Some(took) => {
                tracing::info!(id = %id, took_ms = duration_millis(took), "Connection established");
                Ok(())
            }
            None => {
                self.abandon_revoked(id).await;
                Err(PoolError::ReleasedWhileConnecting(id.clone()))
            }
        }
    }

    async fn await_connected(&self, id: &ConnectionId, epoch: u64) -> Result<(), PoolError> {
        let poll = self.inner.config.status_poll_interval;
        loop {
            if !self.inner.state.lock().holds_creation(id, epoch) {
                return Err(PoolError::ReleasedWhileConnecting(id.clone()));
            }

            match self.inner.transport.status(id) {
                TransportStatus::Connected => return Ok(()),
                TransportStatus::Error => {
                    let reason = self
                        .inner
                        .transport
                        .last_error(id)
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(PoolError::Connection {
                        id: id.clone(),
                        reason,
                    });
                }
                TransportStatus::Connecting | TransportStatus::Disconnected => {
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    /// Tear down a connection whose creation lock was revoked, unless a newer
    /// attempt for the same id has already taken over.
    async fn abandon_revoked(&self, id: &ConnectionId) {
        let superseded = {
            let state = self.inner.state.lock();
            state.active.contains_key(id) || state.creating.contains_key(id)
        };
        tracing::info!(id = %id, superseded, "Released while connecting");
        if !superseded {
            self.disconnect_quietly(id).await;
        }
    }

    async fn disconnect_quietly(&self, id: &ConnectionId) {
        if let Err(e) = self.inner.transport.disconnect(id).await {
            tracing::warn!(id = %id, error = %e, "Disconnect failed");
        }
    }

    fn record_outcome(&self, result: &Result<(), PoolError>, requested: Instant) {
        let mut state = self.inner.state.lock();
        match result {
            Ok(()) => {
                state.counters.total_acquired += 1;
                state.counters.record_wait(requested.elapsed());
            }
            Err(PoolError::ConnectionTimeout { .. }) => {
                state.counters.total_timeout += 1;
                state.counters.total_failed += 1;
            }
            Err(_) => state.counters.total_failed += 1,
        }
    }

    /// Give up the reservation for `id`
    ///
    /// Also revokes an in-flight connection attempt for the id. Returns
    /// whether a reservation was held.
    pub async fn release(&self, id: &ConnectionId, disconnect: bool) -> bool {
        let (released, revoked) = {
            let mut state = self.inner.state.lock();
            let slot = state.take_slot(id);
            let revoked = state.creating.remove(id).is_some();
            (slot, revoked)
        };

        if let Some(slot) = &released {
            tracing::info!(
                id = %id,
                held_ms = duration_millis(slot.acquired.elapsed()),
                disconnect,
                "Released connection"
            );
        }
        if revoked {
            tracing::debug!(id = %id, "Revoked in-flight connection attempt");
        }

        if disconnect {
            self.disconnect_quietly(id).await;
        }

        self.kick_queue();
        released.is_some()
    }

    /// Release every reservation and drop every queued request
    ///
    /// Queued callers see [`PoolError::QueueClosed`]. Returns the number of
    /// reservations released.
    pub async fn release_all(&self) -> usize {
        let (waiters, ids) = {
            let mut state = self.inner.state.lock();
            let waiters = state.queue.clear();
            let mut ids: Vec<ConnectionId> = state
                .active
                .keys()
                .chain(state.creating.keys())
                .cloned()
                .collect();
            ids.sort();
            ids.dedup();
            (waiters, ids)
        };

        if !waiters.is_empty() {
            tracing::info!(count = waiters.len(), "Dropping queued requests");
        }
        drop(waiters);

        let mut released = 0;
        for id in &ids {
            if self.release(id, true).await {
                released += 1;
            }
        }

        tracing::info!(released, "Released all connections");
        released
    }

    fn has_admissible_work(&self) -> bool {
        let state = self.inner.state.lock();
        !state.shut_down
            && !state.queue.is_empty()
            && state.occupied() < self.inner.config.max_connections
    }

    fn kick_queue(&self) {
        if !self.has_admissible_work() {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move { pool.drain_queue().await });
    }

    /// Serve queued requests while slots are free
    ///
    /// Only one drainer runs at a time. After letting go of the drain lock
    /// the holder looks again, so work that arrived in between is not missed.
    async fn drain_queue(&self) {
        loop {
            let Ok(draining) = self.inner.draining.try_lock() else {
                return;
            };
            self.drain_locked().await;
            drop(draining);

            if !self.has_admissible_work() {
                return;
            }
        }
    }

    async fn drain_locked(&self) {
        loop {
            let (ticket, head_id) = {
                let state = self.inner.state.lock();
                if state.shut_down || state.occupied() >= self.inner.config.max_connections {
                    return;
                }
                let Some(head) = state.queue.peek() else {
                    return;
                };
                (head.ticket, head.id.clone())
            };
            let status = self.inner.transport.status(&head_id);

            let (waiter, epoch, stale) = {
                let mut state = self.inner.state.lock();
                if state.shut_down || state.occupied() >= self.inner.config.max_connections {
                    return;
                }
                // The head may have timed out or been outranked while unlocked.
                if state.queue.peek().map(|w| w.ticket) != Some(ticket) {
                    continue;
                }
                let Some(waiter) = state.queue.pop() else {
                    return;
                };

                let mut stale = false;
                if state.active.contains_key(&waiter.id) {
                    if status == TransportStatus::Connected {
                        if let Some(slot) = state.active.get_mut(&waiter.id) {
                            slot.touch();
                        }
                        let _ = waiter.reply.send(Ok(()));
                        continue;
                    }
                    state.take_slot(&waiter.id);
                    stale = true;
                }

                if state.creating.contains_key(&waiter.id) {
                    state.counters.total_failed += 1;
                    let err = PoolError::CreationInProgress(waiter.id.clone());
                    let _ = waiter.reply.send(Err(err));
                    continue;
                }

                let epoch = state.lock_creation(&waiter.id);
                (waiter, epoch, stale)
            };

            tracing::debug!(
                id = %waiter.id,
                priority = waiter.priority,
                waited_ms = duration_millis(waiter.requested.elapsed()),
                "Serving queued request"
            );

            if stale {
                self.disconnect_quietly(&waiter.id).await;
            }

            let result = self.create_connection(&waiter.id, epoch).await;
            self.record_outcome(&result, waiter.requested);

            if let Err(Ok(())) = waiter.reply.send(result) {
                tracing::debug!(id = %waiter.id, "Queued caller went away, releasing slot");
                self.release(&waiter.id, true).await;
            }

            if self.inner.state.lock().queue.is_empty() {
                return;
            }
            tokio::time::sleep(self.inner.config.queue_pacing).await;
        }
    }

    /// Evict idle reservations and expire overdue queued requests
    pub async fn cleanup(&self) -> CleanupReport {
        let idle_timeout = self.inner.config.idle_timeout;
        let queue_timeout = self.inner.config.queue_timeout;

        let (idle, expired) = {
            let mut state = self.inner.state.lock();
            let mut idle: Vec<ConnectionId> = state
                .active
                .iter()
                .filter(|(_, slot)| slot.last_used.elapsed() > idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            idle.sort();
            let expired = state
                .queue
                .remove_where(|w| w.requested.elapsed() > queue_timeout);
            state.counters.total_timeout += expired.len() as u64;
            (idle, expired)
        };

        let mut report = CleanupReport::default();

        for waiter in expired {
            let waited = waiter.requested.elapsed();
            tracing::warn!(id = %waiter.id, waited_ms = duration_millis(waited), "Queue wait timed out");
            let _ = waiter.reply.send(Err(PoolError::QueueTimeout {
                id: waiter.id.clone(),
                waited,
            }));
            report.expired_waiters.push(waiter.id);
        }

        for id in idle {
            tracing::info!(id = %id, "Evicting idle connection");
            self.release(&id, true).await;
            report.evicted.push(id);
        }

        if !report.is_empty() {
            tracing::debug!(
                evicted = report.evicted.len(),
                expired = report.expired_waiters.len(),
                "Cleanup pass finished"
            );
        }
        report
    }

    /// Run `cleanup` every `cleanup_interval` until stopped
    pub fn start_auto_cleanup(&self) {
        let mut cleanup = self.inner.cleanup.lock();
        if cleanup.as_ref().is_some_and(BackgroundLoop::is_running) {
            return;
        }

        tracing::info!(
            interval_ms = duration_millis(self.inner.config.cleanup_interval),
            "Starting pool auto-cleanup"
        );
        *cleanup = Some(BackgroundLoop::spawn(
            "pool-cleanup",
            self.inner.config.cleanup_interval,
            Arc::downgrade(&self.inner),
            |inner: Arc<PoolInner>| async move {
                ConnectionSlotPool { inner }.cleanup().await;
            },
        ));
    }

    pub fn stop_auto_cleanup(&self) {
        if let Some(cleanup) = self.inner.cleanup.lock().take() {
            cleanup.stop();
            tracing::info!("Stopped pool auto-cleanup");
        }
    }

    pub fn is_auto_cleanup_running(&self) -> bool {
        self.inner
            .cleanup
            .lock()
            .as_ref()
            .is_some_and(BackgroundLoop::is_running)
    }

    /// Stop background work, release everything and refuse new requests
    pub async fn shutdown(&self) {
        self.stop_auto_cleanup();
        self.inner.state.lock().shut_down = true;
        let released = self.release_all().await;
        tracing::info!(released, "Connection pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shut_down
    }

    /// Snapshot of counters and occupancy
    pub fn get_stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let mut ids: Vec<ConnectionId> = state.active.keys().cloned().collect();
        ids.sort();

        PoolStats {
            active_connections: state.active.len(),
            connecting: state.creating.len(),
            max_connections: self.inner.config.max_connections,
            queue_length: state.queue.len(),
            total_acquired: state.counters.total_acquired,
            total_released: state.counters.total_released,
            total_failed: state.counters.total_failed,
            total_timeout: state.counters.total_timeout,
            avg_queue_wait_ms: state.counters.avg_queue_wait_ms(),
            avg_connection_duration_ms: state.counters.avg_connection_duration_ms(),
            active_connection_ids: ids,
        }
    }

    /// Reservation held by `id`, if any
    ///
    /// An id whose connection attempt is still in flight is reported as
    /// [`ReservationStatus::Connecting`].
    pub fn reservation(&self, id: &ConnectionId) -> Option<Reservation> {
        let state = self.inner.state.lock();
        if let Some(slot) = state.active.get(id) {
            return Some(slot.reservation.clone());
        }
        state.creating.get(id).map(|lock| Reservation {
            id: id.clone(),
            acquired_at: lock.started_at,
            last_used_at: lock.started_at,
            status: ReservationStatus::Connecting,
        })
    }

    pub fn is_active(&self, id: &ConnectionId) -> bool {
        self.inner.state.lock().active.contains_key(id)
    }

    /// Queued ids in the order they will be served
    pub fn queued_ids(&self) -> Vec<ConnectionId> {
        self.inner
            .state
            .lock()
            .queue
            .ordered()
            .into_iter()
            .map(|w| w.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_core::error::TransportError;
    use tether_core::memory::LinkPlan;
    use tether_core::MemoryTransport;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    fn pool_with(transport: &MemoryTransport, max_connections: usize) -> ConnectionSlotPool {
        let config = PoolConfig {
            max_connections,
            ..PoolConfig::default()
        };
        ConnectionSlotPool::new(Arc::new(transport.clone()), config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_registers_reservation() {
        let transport = MemoryTransport::new();
        let pool = pool_with(&transport, 2);

        assert!(pool.acquire(&id("a"), 5).await);
        let reservation = pool.reservation(&id("a")).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Connected);
        assert_eq!(pool.get_stats().total_acquired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_reuses_healthy_connection() {
        let transport = MemoryTransport::new();
        let pool = pool_with(&transport, 1);

        assert!(pool.acquire(&id("a"), 5).await);
        assert!(pool.acquire(&id("a"), 5).await);
        assert_eq!(transport.connect_count(&id("a")), 1);
        assert_eq!(pool.get_stats().total_acquired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_replaces_dead_connection() {
        let transport = MemoryTransport::new();
        let pool = pool_with(&transport, 1);

        assert!(pool.acquire(&id("a"), 5).await);
        transport.sever(&id("a"));

        assert!(pool.acquire(&id("a"), 5).await);
        assert_eq!(transport.connect_count(&id("a")), 2);
        assert_eq!(transport.disconnect_count(&id("a")), 1);
        assert_eq!(pool.get_stats().total_released, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_attempt_for_same_id_fails_fast() {
        let transport = MemoryTransport::new();
        transport.set_plan("a", LinkPlan::connect_after(Duration::from_secs(1)));
        let pool = pool_with(&transport, 2);

        let first = tokio::spawn({
            let pool = pool.clone();
            async move { pool.reserve(&id("a"), 5).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = pool.reserve(&id("a"), 5).await;
        assert_eq!(second, Err(PoolError::CreationInProgress(id("a"))));
        assert_eq!(first.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_reports_reason() {
        let transport = MemoryTransport::new();
        transport.set_plan("a", LinkPlan::refuse("bad token"));
        let pool = pool_with(&transport, 2);

        let result = pool.reserve(&id("a"), 5).await;
        assert_eq!(
            result,
            Err(PoolError::Connection {
                id: id("a"),
                reason: "bad token".into()
            })
        );
        let stats = pool.get_stats();
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.connecting, 0);
        assert_eq!(stats.active_connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_timeout_tears_attempt_down() {
        let transport = MemoryTransport::new();
        transport.set_plan("a", LinkPlan::hang());
        let pool = pool_with(&transport, 1);

        let result = pool.reserve(&id("a"), 5).await;
        assert!(matches!(result, Err(PoolError::ConnectionTimeout { .. })));
        assert_eq!(transport.disconnect_count(&id("a")), 1);

        let stats = pool.get_stats();
        assert_eq!(stats.total_timeout, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.connecting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_while_connecting_revokes_attempt() {
        let transport = MemoryTransport::new();
        transport.set_plan("a", LinkPlan::connect_after(Duration::from_secs(1)));
        let pool = pool_with(&transport, 1);

        let attempt = tokio::spawn({
            let pool = pool.clone();
            async move { pool.reserve(&id("a"), 5).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.get_stats().connecting, 1);
        assert_eq!(
            pool.reservation(&id("a")).map(|r| r.status),
            Some(ReservationStatus::Connecting)
        );
        assert!(!pool.is_active(&id("a")));

        assert!(!pool.release(&id("a"), true).await);
        assert_eq!(
            attempt.await.unwrap(),
            Err(PoolError::ReleasedWhileConnecting(id("a")))
        );
        assert!(!pool.is_active(&id("a")));
        assert!(pool.reservation(&id("a")).is_none());
        assert_eq!(transport.status(&id("a")), TransportStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connecting_attempts_hold_slots() {
        let transport = MemoryTransport::with_default_plan(LinkPlan::connect_after(Duration::from_millis(500)));
        let pool = pool_with(&transport, 1);

        let a = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire(&id("a"), 5).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let b = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire(&id("b"), 5).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.queued_ids(), vec![id("b")]);

        assert!(a.await.unwrap());
        assert_eq!(pool.get_stats().active_connections, 1);
        pool.release(&id("a"), true).await;
        assert!(b.await.unwrap());
    }

    /// Transport whose status lookups read the pool's stats, as a logging
    /// provider might
    struct StatsReadingTransport {
        memory: MemoryTransport,
        pool: std::sync::OnceLock<ConnectionSlotPool>,
    }

    #[async_trait::async_trait]
    impl Transport for StatsReadingTransport {
        async fn connect(&self, id: &ConnectionId) -> Result<(), TransportError> {
            self.memory.connect(id).await
        }

        fn status(&self, id: &ConnectionId) -> TransportStatus {
            if let Some(pool) = self.pool.get() {
                let _ = pool.get_stats();
            }
            self.memory.status(id)
        }

        fn has_client(&self, id: &ConnectionId) -> bool {
            self.memory.has_client(id)
        }

        async fn disconnect(&self, id: &ConnectionId) -> Result<(), TransportError> {
            self.memory.disconnect(id).await
        }

        async fn send_message(
            &self,
            id: &ConnectionId,
            message_type: &str,
            payload: serde_json::Value,
            timeout: Duration,
        ) -> Result<serde_json::Value, TransportError> {
            self.memory.send_message(id, message_type, payload, timeout).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_may_call_back_into_pool() {
        let transport = Arc::new(StatsReadingTransport {
            memory: MemoryTransport::new(),
            pool: std::sync::OnceLock::new(),
        });
        let config = PoolConfig {
            max_connections: 1,
            ..PoolConfig::default()
        };
        let pool = ConnectionSlotPool::new(transport.clone(), config).unwrap();
        let _ = transport.pool.set(pool.clone());

        assert!(pool.acquire(&id("a"), 5).await);
        assert!(pool.acquire(&id("a"), 5).await);

        let b = tokio::spawn({
            let pool = pool.clone();
            async move { pool.acquire(&id("b"), 5).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.release(&id("a"), true).await;

        assert!(b.await.unwrap());
        assert_eq!(pool.get_stats().active_connection_ids, vec![id("b")]);
    }

    #[tokio::test]
    async fn test_zero_cleanup_interval_is_rejected() {
        let config = PoolConfig {
            cleanup_interval: Duration::ZERO,
            ..PoolConfig::default()
        };
        let result = ConnectionSlotPool::new(Arc::new(MemoryTransport::new()), config);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_refuses_new_requests() {
        let transport = MemoryTransport::new();
        let pool = pool_with(&transport, 1);
        assert!(pool.acquire(&id("a"), 5).await);

        pool.shutdown().await;
        assert!(pool.is_shut_down());
        assert_eq!(pool.get_stats().active_connections, 0);
        assert_eq!(pool.reserve(&id("b"), 5).await, Err(PoolError::ShutDown));
    }
}
