//! tether-scheduler: Priority task scheduling with retries
//!
//! [`TaskScheduler`] runs async work in priority order under a concurrency
//! cap, bounding each attempt by a timeout and retrying failures ahead of
//! the rest of the queue. Callers observe outcomes through task records,
//! never through errors raised at them.

mod scheduler;
mod stats;
pub mod task;

pub use scheduler::TaskScheduler;
pub use stats::{SchedulerStats, SchedulerStatus};
pub use task::{TaskContext, TaskRecord, TaskSpec, TaskStatus};
