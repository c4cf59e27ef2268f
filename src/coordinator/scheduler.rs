//! Retry Scheduler
//!
//! Liveness backstop for missed or coalesced cluster events: while the
//! node is not active, re-run the transition every interval. One task,
//! one firing at a time, and no rescheduling once the fire callback
//! reports that retrying is no longer needed.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cancellable periodic retry task
pub struct RetryScheduler {
    /// Cancellation signal
    cancel: watch::Sender<bool>,
    /// Worker task
    task: JoinHandle<()>,
}

impl RetryScheduler {
    /// Spawn a scheduler firing `fire` every `interval`
    ///
    /// The first firing happens one interval after spawning. `fire`
    /// returns `true` to keep retrying and `false` to stop.
    pub fn spawn<F, Fut>(interval: Duration, mut fire: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let (cancel, mut cancelled) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancelled.changed() => break,
                }

                if *cancelled.borrow() {
                    break;
                }

                if !fire().await {
                    tracing::debug!("Retry scheduler finished");
                    break;
                }
            }
        });

        Self { cancel, task }
    }

    /// Stop rescheduling
    ///
    /// A firing already in progress runs to completion.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
