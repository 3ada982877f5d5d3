//! Periodic background work owned by a component
//!
//! A [`BackgroundLoop`] runs a tick function on a fixed interval until it is
//! stopped, dropped, or its owner goes away. The loop only holds a `Weak`
//! reference to the owner, so it never keeps the owner alive on its own.
//!
//! A tick that is already running when the loop is stopped is allowed to
//! finish; no further ticks are started afterwards.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to a running periodic task
#[derive(Debug)]
pub struct BackgroundLoop {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundLoop {
    /// Spawn a loop that calls `tick` every `period`, starting immediately
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<T, F, Fut>(name: &'static str, period: Duration, owner: Weak<T>, tick: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(task = name, period_ms = period.as_millis() as u64, "Background loop started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(owner) = owner.upgrade() else {
                            break;
                        };
                        tick(owner).await;
                    }
                }
            }

            tracing::debug!(task = name, "Background loop shutting down");
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Name given at spawn time
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the loop will keep ticking
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }

    /// Stop scheduling further ticks
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
