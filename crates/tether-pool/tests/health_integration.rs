//! Health monitor integration tests
//!
//! Pool and monitor share one in-memory transport; faults are injected by
//! scripting heartbeats or severing links.

use std::sync::Arc;
use std::time::Duration;

use tether_core::config::{MonitorConfig, PoolConfig};
use tether_core::memory::{HeartbeatOutcome, LinkPlan};
use tether_core::{ConnectionId, MemoryTransport};
use tether_pool::{ConnectionSlotPool, HealthEventKind, HealthMonitor};

fn id(s: &str) -> ConnectionId {
    ConnectionId::from(s)
}

fn create_pair(transport: &MemoryTransport, config: MonitorConfig) -> (ConnectionSlotPool, HealthMonitor) {
    let pool = ConnectionSlotPool::new(Arc::new(transport.clone()), PoolConfig::default()).unwrap();
    let monitor = HealthMonitor::new(pool.clone(), Arc::new(transport.clone()), config).unwrap();
    (pool, monitor)
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_abandoned_after_budget_is_spent() {
    let transport = MemoryTransport::new();
    transport.set_plan("x", LinkPlan::unresponsive("no pong"));
    let (pool, monitor) = create_pair(&transport, MonitorConfig::default());
    assert!(pool.acquire(&id("x"), 5).await);

    for cycle in 1..=3 {
        let summary = monitor.check_all_connections().await;
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(monitor.reconnect_attempts(&id("x")), cycle);

        let last = monitor.events().pop().unwrap();
        assert_eq!(last.kind, HealthEventKind::ReconnectSuccess);
        assert_eq!(last.attempts, cycle);
    }

    let summary = monitor.check_all_connections().await;
    assert_eq!(summary.unhealthy, 1);
    let last = monitor.events().pop().unwrap();
    assert_eq!(last.kind, HealthEventKind::ReconnectAbandoned);
    assert_eq!(monitor.reconnect_attempts(&id("x")), 3);

    // One initial connect plus three reconnect cycles; the abandoned pass adds none.
    assert_eq!(transport.connect_count(&id("x")), 4);
    assert_eq!(monitor.collect_stats().monitoring.total_reconnects, 3);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_probe_resets_reconnect_counter() {
    let transport = MemoryTransport::new();
    transport.set_plan("x", LinkPlan::unresponsive("no pong"));
    let (pool, monitor) = create_pair(&transport, MonitorConfig::default());
    assert!(pool.acquire(&id("x"), 5).await);

    monitor.check_all_connections().await;
    monitor.check_all_connections().await;
    assert_eq!(monitor.reconnect_attempts(&id("x")), 2);

    transport.set_heartbeat("x", HeartbeatOutcome::Reply);
    let summary = monitor.check_all_connections().await;
    assert_eq!(summary.healthy, 1);
    assert_eq!(monitor.reconnect_attempts(&id("x")), 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_report_covers_every_active_id() {
    let transport = MemoryTransport::new();
    transport.set_plan("b", LinkPlan::unresponsive("no pong"));
    let (pool, monitor) = create_pair(&transport, MonitorConfig::default());
    assert!(pool.acquire(&id("a"), 5).await);
    assert!(pool.acquire(&id("b"), 5).await);

    let summary = monitor.check_all_connections().await;
    assert_eq!((summary.healthy, summary.unhealthy, summary.total), (1, 1, 2));

    assert!(pool.acquire(&id("c"), 5).await);
    let report = monitor.get_health_report();

    assert_eq!(report.total_connections, 3);
    assert_eq!(report.healthy_connections, 1);
    assert_eq!(report.unhealthy_connections, 1);
    assert!(report.detailed_health[&id("a")].healthy);

    let b = &report.detailed_health[&id("b")];
    assert!(!b.healthy);
    assert!(b.reason.as_deref().unwrap().starts_with("heartbeat failed"));

    let c = &report.detailed_health[&id("c")];
    assert_eq!(c.reason.as_deref(), Some("no data"));

    let monitoring = &report.stats.monitoring;
    assert_eq!(monitoring.total_checks, 1);
    assert_eq!(monitoring.health_rate, Some(50.0));
    assert_eq!(report.stats.pool.active_connections, 3);
}

#[tokio::test(start_paused = true)]
async fn test_severed_link_is_replaced() {
    let transport = MemoryTransport::new();
    let (pool, monitor) = create_pair(&transport, MonitorConfig::default());
    assert!(pool.acquire(&id("a"), 5).await);

    transport.sever(&id("a"));
    monitor.check_all_connections().await;
    assert_eq!(
        monitor.health_record(&id("a")).unwrap().reason.as_deref(),
        Some("status: error")
    );
    assert!(pool.is_active(&id("a")));

    let summary = monitor.check_all_connections().await;
    assert_eq!(summary.healthy, 1);
}

#[tokio::test(start_paused = true)]
async fn test_history_and_events_are_bounded() {
    let transport = MemoryTransport::new();
    transport.set_plan("x", LinkPlan::unresponsive("no pong"));
    let config = MonitorConfig {
        history_capacity: 3,
        event_capacity: 2,
        ..MonitorConfig::default()
    };
    let (pool, monitor) = create_pair(&transport, config);
    assert!(pool.acquire(&id("x"), 5).await);

    for _ in 0..5 {
        monitor.check_all_connections().await;
    }

    let stats = monitor.collect_stats();
    assert_eq!(stats.monitoring.total_checks, 5);
    assert_eq!(stats.recent_checks.len(), 3);
    assert_eq!(monitor.events().len(), 2);
    assert!(monitor
        .events()
        .iter()
        .all(|event| event.kind == HealthEventKind::ReconnectAbandoned));
}

#[tokio::test(start_paused = true)]
async fn test_old_events_are_pruned() {
    let transport = MemoryTransport::new();
    transport.set_plan("x", LinkPlan::unresponsive("no pong"));
    let config = MonitorConfig {
        stats_retention_time: Duration::from_secs(10),
        ..MonitorConfig::default()
    };
    let (pool, monitor) = create_pair(&transport, config);
    assert!(pool.acquire(&id("x"), 5).await);

    monitor.check_all_connections().await;
    tokio::time::sleep(Duration::from_secs(11)).await;
    monitor.check_all_connections().await;

    let events = monitor.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_monitoring_loop_checks_on_interval() {
    let transport = MemoryTransport::new();
    let (pool, monitor) = create_pair(&transport, MonitorConfig::default());
    assert!(pool.acquire(&id("a"), 5).await);

    monitor.start_monitoring();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(monitor.collect_stats().monitoring.total_checks, 3);
    assert!(monitor.collect_stats().monitoring.is_active);

    monitor.stop_monitoring();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(monitor.collect_stats().monitoring.total_checks, 3);
    assert_eq!(transport.heartbeat_count(&id("a")), 3);
}
