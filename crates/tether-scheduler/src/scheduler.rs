//! Priority task scheduler
//!
//! Tasks wait in a priority queue (higher first, arrival order among equal
//! priorities) and are launched while fewer than `max_concurrency` are
//! running. Each attempt races the task's work against `task_timeout`.
//!
//! # Retries
//!
//! A failed attempt is retried up to `max_retries` times. The task sits out
//! `retry_delay` and is then put at the *front* of the queue, ahead of
//! every priority.
//!
//! # Cancellation
//!
//! Queued and retry-waiting tasks are cancelled immediately. A running task
//! is only flagged: its [`TaskContext`] observes the signal, and whatever
//! the attempt returns afterwards, success included, the task ends up
//! `Cancelled`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use tether_core::config::SchedulerConfig;
use tether_core::error::{ConfigError, TaskError};
use tether_core::time::{current_time_millis, duration_millis};
use tether_core::{Priority, PriorityQueue, TaskId};

use crate::stats::{SchedulerCounters, SchedulerStats, SchedulerStatus};
use crate::task::{TaskContext, TaskRecord, TaskSpec, TaskStatus, TaskWork, DEFAULT_TASK_NAME};

struct TaskEntry {
    record: TaskRecord,
    work: TaskWork,
    cancel: CancellationToken,
    started: Option<Instant>,
}

#[derive(Default)]
struct SchedulerState {
    queue: PriorityQueue<TaskEntry>,
    running: HashMap<TaskId, TaskEntry>,
    /// Failed tasks waiting out the retry delay
    retrying: HashMap<TaskId, TaskEntry>,
    history: VecDeque<TaskRecord>,
    paused: bool,
    counters: SchedulerCounters,
}

impl SchedulerState {
    fn is_live(&self, id: &TaskId) -> bool {
        self.running.contains_key(id)
            || self.retrying.contains_key(id)
            || self.queue.iter().any(|entry| &entry.record.id == id)
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    /// Held by whichever task is launching queued work
    launching: tokio::sync::Mutex<()>,
    /// Signalled whenever a task reaches a terminal status
    finished: Notify,
}

/// Priority queue with bounded concurrent execution, timeout and retry
///
/// Cloning is cheap; clones share the same scheduler.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TaskScheduler")
            .field("max_concurrency", &self.inner.config.max_concurrency)
            .field("queued", &state.queue.len())
            .field("running", &state.running.len())
            .field("paused", &state.paused)
            .finish_non_exhaustive()
    }
}

enum Settled {
    Done,
    Retry,
}

impl TaskScheduler {
    /// Fails if `config` does not pass [`SchedulerConfig::validate`].
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                state: Mutex::new(SchedulerState::default()),
                launching: tokio::sync::Mutex::new(()),
                finished: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queue a task and return its id without waiting for it to run
    ///
    /// An id supplied through [`TaskSpec::with_id`] must not belong to a task
    /// that is still queued, running or retrying; finished ids may be reused.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, spec: TaskSpec, priority: Priority) -> Result<TaskId, TaskError> {
        let id = spec.id.unwrap_or_else(TaskId::generate);
        let record = TaskRecord {
            id: id.clone(),
            name: spec.name.unwrap_or_else(|| DEFAULT_TASK_NAME.to_string()),
            priority,
            payload: spec.payload,
            retry_count: 0,
            status: TaskStatus::Queued,
            enqueued_at: current_time_millis(),
            started_at: None,
            completed_at: None,
            execution_ms: None,
            result: None,
            error: None,
        };

        {
            let mut state = self.inner.state.lock();
            if state.is_live(&id) {
                tracing::warn!(task = %id, "Rejected task with an id already in use");
                return Err(TaskError::DuplicateId(id));
            }
            let name = record.name.clone();
            let position = state.queue.push(
                TaskEntry {
                    record,
                    work: spec.work,
                    cancel: CancellationToken::new(),
                    started: None,
                },
                priority,
            );
            state.counters.total_enqueued += 1;
            tracing::debug!(
                task = %id,
                name = %name,
                priority,
                position,
                queue_length = state.queue.len(),
                "Task queued"
            );
        }

        self.kick();
        Ok(id)
    }

    /// Launch queued tasks while concurrency allows
    ///
    /// Returns straight away when paused or when another call is already
    /// launching.
    pub async fn process(&self) {
        loop {
            let Ok(launching) = self.inner.launching.try_lock() else {
                return;
            };
            self.launch_ready().await;
            drop(launching);

            if !self.has_launchable_work() {
                return;
            }
        }
    }

    fn has_launchable_work(&self) -> bool {
        let state = self.inner.state.lock();
        !state.paused
            && !state.queue.is_empty()
            && state.running.len() < self.inner.config.max_concurrency
    }

    fn kick(&self) {
        if !self.has_launchable_work() {
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.process().await });
    }

    async fn launch_ready(&self) {
        loop {
            let (work, ctx) = {
                let mut state = self.inner.state.lock();
                if state.paused || state.running.len() >= self.inner.config.max_concurrency {
                    return;
                }
                let Some(mut entry) = state.queue.pop() else {
                    return;
                };

                entry.record.status = TaskStatus::Running;
                entry.record.started_at = Some(current_time_millis());
                entry.started = Some(Instant::now());

                let ctx = TaskContext::new(
                    entry.record.id.clone(),
                    entry.record.name.clone(),
                    entry.record.payload.clone(),
                    entry.record.retry_count + 1,
                    entry.cancel.clone(),
                );
                let work = Arc::clone(&entry.work);
                state.running.insert(entry.record.id.clone(), entry);
                (work, ctx)
            };

            tracing::info!(task = %ctx.id, name = %ctx.name, attempt = ctx.attempt, "Task started");

            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.execute(work, ctx).await });

            if self.inner.state.lock().queue.is_empty() {
                return;
            }
            tokio::time::sleep(self.inner.config.launch_pacing).await;
        }
    }

    async fn execute(&self, work: TaskWork, ctx: TaskContext) {
        let id = ctx.id.clone();
        let timeout = self.inner.config.task_timeout;

        let mut attempt = tokio::spawn(work(ctx));
        let outcome = match tokio::time::timeout(timeout, &mut attempt).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(TaskError::Failed(format!("{e:#}"))),
            Ok(Err(join)) => Err(TaskError::Panicked(panic_message(join))),
            Err(_) => {
                attempt.abort();
                Err(TaskError::Timeout(timeout))
            }
        };

        if let Some(Settled::Retry) = self.settle(&id, outcome) {
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.requeue_after_delay(id).await });
        }
        self.kick();
    }

    /// Record the outcome of an attempt
    fn settle(&self, id: &TaskId, outcome: Result<Value, TaskError>) -> Option<Settled> {
        let mut state = self.inner.state.lock();
        let mut entry = state.running.remove(id)?;
        let cancelling = entry.record.status == TaskStatus::Cancelling;
        let elapsed = entry.started.map(|s| s.elapsed()).unwrap_or_default();

        let settled = match outcome {
            Ok(value) if !cancelling => {
                entry.record.status = TaskStatus::Completed;
                entry.record.execution_ms = Some(duration_millis(elapsed));
                entry.record.result = Some(value);
                entry.record.error = None;
                state.counters.total_completed += 1;
                state.counters.record_execution(elapsed);
                tracing::info!(task = %id, took_ms = duration_millis(elapsed), "Task completed");
                Settled::Done
            }
            Ok(_) => {
                entry.record.status = TaskStatus::Cancelled;
                entry.record.error = Some(TaskError::Cancelled.to_string());
                state.counters.total_cancelled += 1;
                tracing::info!(task = %id, "Task finished after cancel request, recorded as cancelled");
                Settled::Done
            }
            Err(e) if !cancelling && entry.record.retry_count < self.inner.config.max_retries => {
                entry.record.retry_count += 1;
                entry.record.status = TaskStatus::Queued;
                entry.record.error = Some(e.to_string());
                entry.started = None;
                state.counters.total_retries += 1;
                tracing::warn!(
                    task = %id,
                    error = %e,
                    retry = entry.record.retry_count,
                    max_retries = self.inner.config.max_retries,
                    "Task failed, will retry"
                );
                state.retrying.insert(id.clone(), entry);
                return Some(Settled::Retry);
            }
            Err(e) if cancelling => {
                entry.record.status = TaskStatus::Cancelled;
                entry.record.error = Some(e.to_string());
                state.counters.total_cancelled += 1;
                tracing::info!(task = %id, error = %e, "Cancelled task failed");
                Settled::Done
            }
            Err(e) => {
                entry.record.status = TaskStatus::Failed;
                entry.record.error = Some(e.to_string());
                state.counters.total_failed += 1;
                tracing::error!(task = %id, error = %e, retries = entry.record.retry_count, "Task failed");
                Settled::Done
            }
        };

        entry.record.completed_at = Some(current_time_millis());
        self.archive(&mut state, entry.record);
        drop(state);
        self.inner.finished.notify_waiters();
        Some(settled)
    }

    async fn requeue_after_delay(&self, id: TaskId) {
        tokio::time::sleep(self.inner.config.retry_delay).await;

        {
            let mut state = self.inner.state.lock();
            // Gone if cancelled or cleared during the delay.
            let Some(entry) = state.retrying.remove(&id) else {
                return;
            };
            state.queue.push_front(entry);
            tracing::debug!(task = %id, "Retry queued ahead of pending tasks");
        }

        self.kick();
    }

    fn archive(&self, state: &mut SchedulerState, record: TaskRecord) {
        state.history.push_back(record);
        while state.history.len() > self.inner.config.history_capacity {
            state.history.pop_front();
        }
    }

    fn cancel_entry(&self, state: &mut SchedulerState, mut entry: TaskEntry) {
        entry.cancel.cancel();
        entry.record.status = TaskStatus::Cancelled;
        entry.record.error = Some(TaskError::Cancelled.to_string());
        entry.record.completed_at = Some(current_time_millis());
        state.counters.total_cancelled += 1;
        self.archive(state, entry.record);
    }

    /// Stop launching new tasks; running tasks are left alone
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
        tracing::info!("Scheduler paused");
    }

    /// Resume launching queued tasks
    pub fn resume(&self) {
        self.inner.state.lock().paused = false;
        tracing::info!("Scheduler resumed");
        self.kick();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Cancel a task
    ///
    /// Queued or retry-waiting tasks are cancelled on the spot. Running
    /// tasks are flagged `Cancelling` and settle as `Cancelled` when their
    /// attempt returns. Returns `false` for unknown or finished tasks.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let mut state = self.inner.state.lock();

        let pending = match state.queue.remove_first(|entry| entry.record.id == *id) {
            Some(entry) => Some(entry),
            None => state.retrying.remove(id),
        };
        if let Some(entry) = pending {
            self.cancel_entry(&mut state, entry);
            drop(state);
            tracing::info!(task = %id, "Cancelled pending task");
            self.inner.finished.notify_waiters();
            return true;
        }

        if let Some(entry) = state.running.get_mut(id) {
            if entry.record.status == TaskStatus::Running {
                entry.record.status = TaskStatus::Cancelling;
                entry.cancel.cancel();
                tracing::info!(task = %id, "Cancel requested for running task");
            }
            return true;
        }

        false
    }

    /// Cancel every queued and retry-waiting task, returning how many
    pub fn clear(&self) -> usize {
        let mut state = self.inner.state.lock();
        let mut pending = state.queue.clear();
        let mut retrying: Vec<TaskEntry> = state.retrying.drain().map(|(_, entry)| entry).collect();
        retrying.sort_by(|a, b| a.record.id.cmp(&b.record.id));
        pending.extend(retrying);

        let count = pending.len();
        for entry in pending {
            self.cancel_entry(&mut state, entry);
        }
        drop(state);

        if count > 0 {
            tracing::info!(count, "Cleared task queue");
            self.inner.finished.notify_waiters();
        }
        count
    }

    pub fn get_status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock();
        SchedulerStatus {
            queue_length: state.queue.len(),
            running_tasks: state.running.len(),
            retrying_tasks: state.retrying.len(),
            completed_tasks: state.history.len(),
            is_paused: state.paused,
            stats: state.counters.snapshot(),
        }
    }

    pub fn get_stats(&self) -> SchedulerStats {
        self.inner.state.lock().counters.snapshot()
    }

    /// Latest known record for `id`
    pub fn task(&self, id: &TaskId) -> Option<TaskRecord> {
        let state = self.inner.state.lock();
        state
            .running
            .get(id)
            .or_else(|| state.retrying.get(id))
            .or_else(|| state.queue.iter().find(|entry| entry.record.id == *id))
            .map(|entry| entry.record.clone())
            .or_else(|| state.history.iter().rev().find(|r| r.id == *id).cloned())
    }

    /// Finished tasks, oldest first
    pub fn history(&self) -> Vec<TaskRecord> {
        self.inner.state.lock().history.iter().cloned().collect()
    }

    /// Ids of queued tasks in launch order
    pub fn queued_ids(&self) -> Vec<TaskId> {
        self.inner
            .state
            .lock()
            .queue
            .ordered()
            .into_iter()
            .map(|entry| entry.record.id.clone())
            .collect()
    }

    /// Wait until `id` reaches a terminal status
    ///
    /// Returns `None` if the scheduler does not know the id.
    pub async fn wait_for(&self, id: &TaskId) -> Option<TaskRecord> {
        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record = self.task(id)?;
            if record.status.is_terminal() {
                return Some(record);
            }
            notified.await;
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task aborted".to_string();
    }
    let panic = err.into_panic();
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(SchedulerConfig::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_task_keeps_result() {
        let scheduler = scheduler();
        let id = scheduler.enqueue(
            TaskSpec::new(|ctx| async move { Ok(json!({ "echo": ctx.payload })) })
                .with_name("echo")
                .with_payload(json!(7)),
            5,
        ).unwrap();

        let record = scheduler.wait_for(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.name, "echo");
        assert_eq!(record.result, Some(json!({ "echo": 7 })));
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert_eq!(scheduler.get_stats().total_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_ids_and_default_name() {
        let scheduler = scheduler();
        scheduler.pause();
        let id = scheduler.enqueue(TaskSpec::new(|_| async { Ok(Value::Null) }), 5).unwrap();

        assert!(id.as_str().starts_with("task_"));
        let record = scheduler.task(&id).unwrap();
        assert_eq!(record.name, DEFAULT_TASK_NAME);
        assert_eq!(record.status, TaskStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_fails() {
        let config = SchedulerConfig {
            max_retries: 0,
            ..SchedulerConfig::default()
        };
        let scheduler = TaskScheduler::new(config).unwrap();
        let id = scheduler.enqueue(
            TaskSpec::new(|_| async {
                if true {
                    panic!("worker exploded");
                }
                Ok(Value::Null)
            }),
            5,
        ).unwrap();

        let record = scheduler.wait_for(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Task panicked: worker exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let config = SchedulerConfig {
            max_retries: 0,
            task_timeout: Duration::from_secs(1),
            ..SchedulerConfig::default()
        };
        let scheduler = TaskScheduler::new(config).unwrap();
        let id = scheduler.enqueue(
            TaskSpec::new(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Value::Null)
            }),
            5,
        ).unwrap();

        let record = scheduler.wait_for(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Task timed out after 1s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_unknown_task() {
        let scheduler = scheduler();
        assert!(!scheduler.cancel(&TaskId::from("nope")));
        assert!(scheduler.wait_for(&TaskId::from("nope")).await.is_none());
    }
}
