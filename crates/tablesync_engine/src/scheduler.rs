//! Cancellable deferred work.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A future scheduled to run after a delay.
///
/// Dropping the handle cancels the task if it has not run yet. Delays use
/// `tokio::time`, so paused-clock tests can advance them deterministically.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Runs `task` once `delay` has elapsed.
    pub fn after<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self { handle }
    }

    /// Cancels the task if it has not finished.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Returns true once the task has run or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
