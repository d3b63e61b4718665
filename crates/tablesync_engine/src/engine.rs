//! Sync engine: push, pull and the background worker.
//!
//! One cycle pushes pending outbox batches until the queue is drained and
//! then pulls until the authority has nothing newer. Each authority
//! response is applied through [`StateStore::apply_remote`] in one durable
//! commit, so the cursor never gets ahead of the data it covers.
//!
//! At most one cycle runs per replica. A request that arrives while a cycle
//! is in flight is coalesced: the running cycle goes around once more
//! instead of a second cycle starting.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::StateEvent;
use crate::scheduler::ScheduledTask;
use crate::state::{RemoteBatch, StateStore};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tablesync_protocol::{CellConflict, Cursor, PushRequest};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Connectivity and progress as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    /// The client has no connectivity.
    Offline,
    /// Connected, nothing synced yet.
    Online,
    /// A cycle is running.
    Syncing,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of operations pushed and acknowledged.
    pub operations_pushed: u64,
    /// Total number of remote deltas received.
    pub deltas_received: u64,
    /// Total number of remote deltas that changed state.
    pub deltas_applied: u64,
    /// Total number of conflicts recorded.
    pub conflicts_encountered: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last successful sync.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// Operations pushed and acknowledged.
    pub pushed: usize,
    /// Push requests sent.
    pub push_batches: usize,
    /// Remote deltas received by pushes and pulls.
    pub received: usize,
    /// Remote deltas that changed state.
    pub applied: usize,
    /// Remote cell writes that lost to local values.
    pub conflicts: Vec<CellConflict>,
    /// Cursor persisted at the end of the cycle.
    pub cursor: Cursor,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

/// What a sync request led to.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// This call ran the cycle.
    Completed(SyncCycleResult),
    /// A cycle was already running; it will run once more.
    Coalesced,
}

impl SyncOutcome {
    /// The cycle result, if this call ran one.
    pub fn result(&self) -> Option<&SyncCycleResult> {
        match self {
            SyncOutcome::Completed(result) => Some(result),
            SyncOutcome::Coalesced => None,
        }
    }
}

struct Inner<T> {
    config: SyncConfig,
    transport: T,
    state: Arc<StateStore>,
    status: RwLock<SyncStatus>,
    stats: RwLock<SyncStats>,
    online: AtomicBool,
    running: AtomicBool,
    rerun: AtomicBool,
    cancelled: AtomicBool,
    wake: Notify,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The sync engine manages synchronization with a remote authority.
///
/// Cloning is cheap; clones share one engine.
pub struct SyncEngine<T: SyncTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: SyncTransport> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
    /// Creates an engine for `state`, starting online.
    pub fn new(state: Arc<StateStore>, transport: T, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                state,
                status: RwLock::new(SyncStatus::Online),
                stats: RwLock::new(SyncStats::default()),
                online: AtomicBool::new(true),
                running: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// The state store this engine syncs.
    pub fn state(&self) -> &Arc<StateStore> {
        &self.inner.state
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Gets the current status.
    pub fn status(&self) -> SyncStatus {
        *self.inner.status.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns true while a cycle is in flight.
    pub fn is_syncing(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Returns true if the client considers itself connected.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity change.
    ///
    /// Coming online with auto-sync enabled wakes the background worker.
    pub fn set_online(&self, online: bool) {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if was == online {
            return;
        }
        info!(online, "connectivity changed");
        if online {
            self.set_status(SyncStatus::Online);
            if self.auto_sync_enabled() {
                self.inner.wake.notify_one();
            }
        } else {
            self.set_status(SyncStatus::Offline);
        }
    }

    /// Wakes the background worker for a cycle.
    pub fn request_sync(&self) {
        self.inner.wake.notify_one();
    }

    /// Stops the running cycle at the next batch boundary.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if both the engine and the persisted settings allow
    /// syncing without an explicit request.
    pub fn auto_sync_enabled(&self) -> bool {
        self.inner.config.auto_sync
            && self
                .inner
                .state
                .settings()
                .map(|settings| settings.auto_sync)
                .unwrap_or(true)
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_status(&self, status: SyncStatus) {
        {
            let mut current = self.inner.status.write();
            if *current == status {
                return;
            }
            *current = status;
        }
        self.inner
            .state
            .publish(StateEvent::SyncStatusChanged { status });
    }

    /// Runs one sync cycle now, or coalesces with the one in flight.
    ///
    /// A request is registered before the in-flight flag is tested, and the
    /// running caller re-checks for requests after releasing the flag, so a
    /// request is never dropped between the two. A request that arrives
    /// during a failing cycle still gets its own cycle. Cancellation drops
    /// pending requests.
    pub async fn sync_now(&self) -> SyncResult<SyncOutcome> {
        if !self.is_online() {
            return Err(SyncError::network_fatal("client is offline"));
        }
        self.inner.rerun.store(true, Ordering::SeqCst);
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("sync already in flight; coalesced");
            return Ok(SyncOutcome::Coalesced);
        }
        self.inner.cancelled.store(false, Ordering::SeqCst);

        let mut last = None;
        loop {
            {
                let _guard = CycleGuard(&self.inner.running);
                while self.inner.rerun.swap(false, Ordering::SeqCst) {
                    if last.is_some() {
                        debug!("running coalesced sync request");
                    }
                    match self.run_cycle().await {
                        Err(SyncError::Cancelled) => {
                            self.inner.rerun.store(false, Ordering::SeqCst);
                            return Err(SyncError::Cancelled);
                        }
                        outcome => last = Some(outcome),
                    }
                }
            }
            if !self.inner.rerun.load(Ordering::SeqCst)
                || self.inner.running.swap(true, Ordering::SeqCst)
            {
                break;
            }
        }

        match last {
            Some(Ok(result)) => Ok(SyncOutcome::Completed(result)),
            Some(Err(err)) => Err(err),
            None => Ok(SyncOutcome::Coalesced),
        }
    }

    /// Runs [`SyncEngine::sync_now`], retrying retryable failures with
    /// exponential backoff.
    pub async fn sync_with_retry(&self) -> SyncResult<SyncOutcome> {
        let retry = &self.inner.config.retry;
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                debug!(attempt, ?delay, "retrying sync");
                tokio::time::sleep(delay).await;
                self.inner.stats.write().retries += 1;
            }

            match self.sync_now().await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                    warn!(error = %err, attempt, "sync failed; will retry");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_cycle(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.set_status(SyncStatus::Syncing);
        debug!(
            pending = self.inner.state.outbox().pending_count(),
            "sync cycle started"
        );

        let mut result = SyncCycleResult::default();
        let outcome = async {
            self.push_all(&mut result).await?;
            self.pull_all(&mut result).await?;
            result.cursor = self.inner.state.cursor()?;
            Ok::<_, SyncError>(())
        }
        .await;
        result.duration = start.elapsed();

        match outcome {
            Ok(()) => {
                self.set_status(SyncStatus::Synced);
                let mut stats = self.inner.stats.write();
                stats.cycles_completed += 1;
                stats.operations_pushed += result.pushed as u64;
                stats.deltas_received += result.received as u64;
                stats.deltas_applied += result.applied as u64;
                stats.conflicts_encountered += result.conflicts.len() as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
                info!(
                    pushed = result.pushed,
                    received = result.received,
                    conflicts = result.conflicts.len(),
                    cursor = %result.cursor,
                    "sync cycle finished"
                );
                Ok(result)
            }
            Err(err) => {
                let status = if self.is_online() {
                    SyncStatus::Error
                } else {
                    SyncStatus::Offline
                };
                self.set_status(status);
                self.inner.stats.write().last_error = Some(err.to_string());
                warn!(error = %err, "sync cycle failed");
                Err(err)
            }
        }
    }

    /// Pushes pending batches until the outbox is drained.
    async fn push_all(&self, result: &mut SyncCycleResult) -> SyncResult<()> {
        let state = &self.inner.state;
        loop {
            self.check_cancelled()?;

            let batch = state
                .outbox()
                .pending_batch(self.inner.config.push_batch_size);
            if batch.is_empty() {
                return Ok(());
            }

            let ids: Vec<u64> = batch.iter().map(|entry| entry.id).collect();
            let ops = batch.into_iter().map(|entry| entry.op).collect::<Vec<_>>();
            let count = ops.len();
            let request = PushRequest::new(state.client_id(), state.cursor()?, ops);

            let response = self.inner.transport.push(&request).await?;
            result.push_batches += 1;
            if !response.success {
                let reason = response
                    .error
                    .unwrap_or_else(|| "push rejected without reason".to_string());
                return Err(SyncError::ServerRejected(reason));
            }

            result.received += response.deltas.len();
            let report = state.apply_remote(RemoteBatch {
                deltas: response.deltas,
                tables: response.tables,
                cursor: response.cursor,
                acknowledged: ids,
            })?;
            debug!(count, pruned = report.acknowledged, "batch acknowledged");
            result.pushed += count;
            result.applied += report.applied;
            result.conflicts.extend(report.conflicts);
        }
    }

    /// Pulls until a response carries no deltas or no progress.
    async fn pull_all(&self, result: &mut SyncCycleResult) -> SyncResult<()> {
        let state = &self.inner.state;
        loop {
            self.check_cancelled()?;

            let since = state.cursor()?;
            let response = self.inner.transport.pull(&since).await?;
            let received = response.deltas.len();
            result.received += received;

            let report = state.apply_remote(RemoteBatch {
                deltas: response.deltas,
                tables: response.tables,
                cursor: response.cursor,
                acknowledged: Vec::new(),
            })?;
            result.applied += report.applied + report.snapshot_tables;
            result.conflicts.extend(report.conflicts);

            if received == 0 || report.cursor <= since {
                return Ok(());
            }
        }
    }

    /// Starts a background task that syncs whenever the outbox is
    /// flushed, the engine is woken, or the configured interval elapses.
    ///
    /// Failed cycles schedule another attempt after the maximum retry
    /// delay.
    pub fn spawn_worker(&self) -> SyncWorker {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = self.clone();
        let flush = engine.inner.state.outbox().flush_signal();

        let handle = tokio::spawn(async move {
            let mut interval = engine.inner.config.sync_interval.map(|period| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            let mut retry: Option<ScheduledTask> = None;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = flush.notified() => {
                        if !engine.auto_sync_enabled() {
                            continue;
                        }
                    }
                    _ = engine.inner.wake.notified() => {}
                    _ = tick(&mut interval) => {}
                }
                if !engine.is_online() {
                    continue;
                }

                match engine.sync_with_retry().await {
                    Ok(_) => retry = None,
                    Err(err) => {
                        warn!(error = %err, "background sync failed");
                        let waker = engine.clone();
                        retry = Some(ScheduledTask::after(
                            engine.inner.config.retry.max_delay,
                            async move { waker.request_sync() },
                        ));
                    }
                }
            }
            drop(retry);
            debug!("sync worker stopped");
        });

        SyncWorker {
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle to the background sync task. Dropping it aborts the task.
#[derive(Debug)]
pub struct SyncWorker {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Stops the worker after its current cycle and waits for it.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
