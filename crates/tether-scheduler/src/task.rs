//! Task definitions
//!
//! A task is a unit of work plus the bookkeeping the scheduler keeps about
//! it. The work itself is a closure that is called once per attempt with a
//! fresh [`TaskContext`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tether_core::{Priority, TaskId};

/// Name given to tasks enqueued without one
pub const DEFAULT_TASK_NAME: &str = "Unnamed Task";

/// Work run for each attempt of a task
pub type TaskWork = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// What to run, as handed to `TaskScheduler::enqueue`
#[derive(Clone)]
pub struct TaskSpec {
    pub(crate) id: Option<TaskId>,
    pub(crate) name: Option<String>,
    pub(crate) payload: Value,
    pub(crate) work: TaskWork,
}

impl TaskSpec {
    /// Wrap an async closure as a task
    pub fn new<F, Fut>(work: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            id: None,
            name: None,
            payload: Value::Null,
            work: Arc::new(move |ctx| work(ctx).boxed()),
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Data passed to every attempt through [`TaskContext::payload`]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Per-attempt view handed to the task's work
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: TaskId,
    pub name: String,
    pub payload: Value,
    /// 1 for the first run, incremented on every retry
    pub attempt: u32,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, name: String, payload: Value, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            id,
            name,
            payload,
            attempt,
            cancel,
        }
    }

    /// Whether `cancel` has been called for this task
    ///
    /// Cancellation is cooperative: work that never checks keeps running.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the task is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    /// Cancel requested while running; the outcome will be `Cancelled`
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has left the scheduler for good
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Cancelling => "cancelling",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of a task's bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
    pub payload: Value,
    /// Retries used so far
    pub retry_count: u32,
    pub status: TaskStatus,
    /// Timestamps are milliseconds since the Unix epoch
    pub enqueued_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    /// Duration of the successful attempt
    pub execution_ms: Option<u64>,
    pub result: Option<Value>,
    /// Message of the most recent failure
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_builder() {
        let spec = TaskSpec::new(|_ctx| async { Ok(Value::Null) })
            .with_id("job-1")
            .with_name("sync")
            .with_payload(json!({ "n": 1 }));

        assert_eq!(spec.id, Some(TaskId::from("job-1")));
        assert_eq!(spec.name.as_deref(), Some("sync"));
        assert_eq!(spec.payload, json!({ "n": 1 }));
    }

    #[tokio::test]
    async fn test_context_observes_cancellation() {
        let token = CancellationToken::new();
        let ctx = TaskContext::new(TaskId::from("t"), "t".into(), Value::Null, 1, token.clone());
        assert!(!ctx.is_cancelled());

        token.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Cancelling.is_terminal());
        assert_eq!(serde_json::to_string(&TaskStatus::Cancelling).unwrap(), "\"cancelling\"");
    }
}
