//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tablesync_protocol::{Cursor, PullResponse, PushRequest, PushResponse};

/// Network access to the remote authority.
///
/// Implementations only move messages. Deciding what a response means is
/// left to the sync engine.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends a batch of operations (`POST /sync`).
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Fetches deltas after `since` (`GET /sync?since=`).
    async fn pull(&self, since: &Cursor) -> SyncResult<PullResponse>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        (**self).push(request).await
    }

    async fn pull(&self, since: &Cursor) -> SyncResult<PullResponse> {
        (**self).pull(since).await
    }
}

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    /// A push.
    Push(PushRequest),
    /// A pull from the given cursor.
    Pull(Cursor),
}

/// A scripted transport for testing.
///
/// Responses are served from per-endpoint queues. With an empty queue a
/// push is accepted with the request's base cursor and a pull returns no
/// deltas.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    failures: AtomicU32,
    pushes: Mutex<VecDeque<SyncResult<PushResponse>>>,
    pulls: Mutex<VecDeque<SyncResult<PullResponse>>>,
    calls: Mutex<Vec<TransportCall>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a connected transport with nothing scripted.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            pushes: Mutex::new(VecDeque::new()),
            pulls: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues the outcome of a future push.
    pub fn push_result(&self, result: SyncResult<PushResponse>) {
        self.pushes.lock().push_back(result);
    }

    /// Queues the outcome of a future pull.
    pub fn pull_result(&self, result: SyncResult<PullResponse>) {
        self.pulls.lock().push_back(result);
    }

    /// Makes the next `n` calls fail with a retryable network error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Sets the connected state. Calls fail while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Number of pushes received.
    pub fn push_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, TransportCall::Push(_)))
            .count()
    }

    fn check(&self, call: TransportCall) -> SyncResult<()> {
        self.calls.lock().push(call);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::network_retryable("not connected"));
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::network_retryable("injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.check(TransportCall::Push(request.clone()))?;
        self.pushes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PushResponse::accepted(request.base_cursor.clone(), Vec::new())))
    }

    async fn pull(&self, since: &Cursor) -> SyncResult<PullResponse> {
        self.check(TransportCall::Pull(since.clone()))?;
        self.pulls
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PullResponse::new(Vec::new(), since.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PushRequest {
        PushRequest::new("c", Cursor::new("3"), Vec::new())
    }

    #[tokio::test]
    async fn unscripted_calls_echo_cursor() {
        let transport = MockTransport::new();
        let push = transport.push(&request()).await.unwrap();
        assert!(push.success);
        assert_eq!(push.cursor, Cursor::new("3"));

        let pull = transport.pull(&Cursor::new("8")).await.unwrap();
        assert!(pull.deltas.is_empty());
        assert_eq!(pull.cursor, Cursor::new("8"));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn scripted_results_are_served_in_order() {
        let transport = MockTransport::new();
        transport.push_result(Ok(PushResponse::rejected(Cursor::origin(), "bad")));
        transport.push_result(Err(SyncError::Protocol("garbled".into())));

        assert!(!transport.push(&request()).await.unwrap().success);
        assert!(matches!(
            transport.push(&request()).await,
            Err(SyncError::Protocol(_))
        ));
        assert!(transport.push(&request()).await.unwrap().success);
    }

    #[tokio::test]
    async fn injected_failures_are_retryable() {
        let transport = MockTransport::new();
        transport.fail_next(2);
        assert!(transport.pull(&Cursor::origin()).await.unwrap_err().is_retryable());
        assert!(transport.pull(&Cursor::origin()).await.unwrap_err().is_retryable());
        assert!(transport.pull(&Cursor::origin()).await.is_ok());
    }

    #[tokio::test]
    async fn disconnected_transport_fails_and_logs() {
        let transport = Arc::new(MockTransport::new());
        transport.set_connected(false);
        assert!(transport.push(&request()).await.unwrap_err().is_network());
        assert_eq!(transport.push_count(), 1);
    }
}
