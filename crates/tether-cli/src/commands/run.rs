//! `tether run`: drive the pool, monitor and scheduler against an in-memory transport

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tether_core::memory::LinkPlan;
use tether_core::types::DEFAULT_PRIORITY;
use tether_core::{ConnectionId, MemoryTransport, TetherConfig, Transport};
use tether_pool::{ConnectionSlotPool, HealthMonitor, HealthReport, PoolStats};
use tether_scheduler::{SchedulerStatus, TaskContext, TaskRecord, TaskScheduler, TaskSpec};

/// Options of a `tether run` invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Client ids; one session task is scheduled per id
    pub ids: Vec<String>,
    /// Wall time before the run is stopped
    pub duration: Duration,
    /// How long each session keeps its slot
    pub hold: Duration,
    /// Ids whose heartbeats are refused
    pub flaky: Vec<String>,
    /// Overrides `monitor.check_interval`
    pub check_interval: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ids: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            duration: Duration::from_secs(10),
            hold: Duration::from_millis(500),
            flaky: Vec::new(),
            check_interval: None,
        }
    }
}

/// Final state of every engine when the run stopped
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pool: PoolStats,
    pub health: HealthReport,
    pub scheduler: SchedulerStatus,
    pub tasks: Vec<TaskRecord>,
    /// Whether the run ended because `cancel` fired
    pub interrupted: bool,
}

/// Run one session per id until `options.duration` elapses or `cancel` fires
pub async fn run_command(
    mut config: TetherConfig,
    options: RunOptions,
    cancel: CancellationToken,
) -> Result<RunReport> {
    if let Some(interval) = options.check_interval {
        config.monitor.check_interval = interval;
    }
    config.validate()?;

    let memory = MemoryTransport::new();
    for id in &options.flaky {
        memory.set_plan(id.as_str(), LinkPlan::unresponsive("heartbeat refused"));
    }
    let transport: Arc<dyn Transport> = Arc::new(memory);

    let pool = ConnectionSlotPool::new(transport, config.pool.clone())?;
    pool.start_auto_cleanup();

    let monitor = HealthMonitor::for_pool(pool.clone(), config.monitor.clone())?;
    monitor.start_monitoring();

    let scheduler = TaskScheduler::new(config.scheduler.clone())?;

    for id in &options.ids {
        let task = session_task(pool.clone(), ConnectionId::new(id.as_str()), options.hold);
        let task_id = scheduler.enqueue(task, DEFAULT_PRIORITY)?;
        tracing::info!(%task_id, client = %id, "Scheduled session");
    }

    let interrupted = tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(options.duration) => false,
    };

    if interrupted {
        tracing::info!("Run interrupted, shutting down");
    } else {
        tracing::info!(duration = ?options.duration, "Run finished, shutting down");
    }

    let report = RunReport {
        pool: pool.get_stats(),
        health: monitor.get_health_report(),
        scheduler: scheduler.get_status(),
        tasks: scheduler.history(),
        interrupted,
    };

    scheduler.pause();
    let dropped = scheduler.clear();
    if dropped > 0 {
        tracing::warn!(dropped, "Cancelled unfinished sessions");
    }
    monitor.stop_monitoring();
    pool.shutdown().await;

    Ok(report)
}

/// Reserve a slot for `id`, hold it, then hand it back
fn session_task(pool: ConnectionSlotPool, id: ConnectionId, hold: Duration) -> TaskSpec {
    let name = format!("session {}", id);
    let task_id = format!("session-{}", id);
    let payload = json!({ "client": id.as_str(), "hold_ms": hold.as_millis() as u64 });

    TaskSpec::new(move |ctx: TaskContext| {
        let pool = pool.clone();
        let id = id.clone();
        async move {
            pool.reserve(&id, DEFAULT_PRIORITY).await?;

            let completed = tokio::select! {
                _ = ctx.cancelled() => false,
                _ = tokio::time::sleep(hold) => true,
            };
            pool.release(&id, true).await;

            if !completed {
                anyhow::bail!("session {} cancelled", id);
            }
            Ok(json!({ "client": id.as_str(), "attempt": ctx.attempt }))
        }
    })
    .with_id(task_id)
    .with_name(name)
    .with_payload(payload)
}
