//! Durable queue of local operations awaiting acknowledgement.
//!
//! Entries are persisted before they can be seen by the flush path and stay
//! pending until the authority acknowledges them. Ids come from a persisted
//! sequence, so enqueue order survives restarts and ids are never reused.
//! The highest timestamp stamped on a local operation is persisted with
//! each entry, so a restarted replica never reissues a `(clientId, ts)`
//! pair the authority has already seen.

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::store::{meta_keys, DurableStore, Txn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tablesync_protocol::Operation;
use tokio::sync::Notify;
use tracing::debug;

/// One queued operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Local sequence id; orders the queue.
    pub id: u64,
    /// The operation, stamped with timestamp and client id.
    pub op: Operation,
    /// Set once the authority has acknowledged the operation.
    pub synced: bool,
    /// Local time the entry was queued.
    pub enqueued_at: u64,
}

/// The outbox queue.
pub struct Outbox {
    store: Arc<DurableStore>,
    clock: Arc<dyn Clock>,
    client_id: String,
    last_ts: Mutex<u64>,
    flush: Arc<Notify>,
}

impl Outbox {
    /// Opens the queue held by `store` for the replica `client_id`.
    pub fn open(
        store: Arc<DurableStore>,
        clock: Arc<dyn Clock>,
        client_id: impl Into<String>,
    ) -> StoreResult<Self> {
        let last_ts = store.meta::<u64>(meta_keys::LAST_TS)?.unwrap_or(0);
        Ok(Self {
            store,
            clock,
            client_id: client_id.into(),
            last_ts: Mutex::new(last_ts),
            flush: Arc::new(Notify::new()),
        })
    }

    /// Id stamped on this replica's operations.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns a timestamp for a new local write.
    ///
    /// Timestamps issued by one queue strictly increase, and are greater
    /// than `floor` when given, so a local write always supersedes the value
    /// it replaces.
    pub fn next_timestamp(&self, floor: Option<u64>) -> u64 {
        let mut last = self.last_ts.lock();
        let mut ts = self.clock.now_ms();
        if *last > 0 {
            ts = ts.max(last.saturating_add(1));
        }
        if let Some(floor) = floor {
            ts = ts.max(floor.saturating_add(1));
        }
        *last = ts;
        ts
    }

    /// Appends `op` inside the caller's transaction.
    ///
    /// Fills in the timestamp and client id when the operation has none.
    /// The flush signal is not raised; call [`Outbox::signal`] once the
    /// transaction has committed.
    pub fn enqueue_in(&self, txn: &mut Txn<'_>, mut op: Operation) -> StoreResult<OutboxEntry> {
        if op.ts.is_none() {
            op.ts = Some(self.next_timestamp(None));
        }
        if op.client_id.is_none() {
            op.client_id = Some(self.client_id.clone());
        }
        if op.client_id.as_deref() == Some(self.client_id.as_str()) {
            let ts = op.ts.unwrap_or(0);
            if txn.meta::<u64>(meta_keys::LAST_TS)?.unwrap_or(0) < ts {
                txn.put_meta(meta_keys::LAST_TS, &ts)?;
            }
        }

        let id = txn.meta::<u64>(meta_keys::OUTBOX_SEQ)?.unwrap_or(0) + 1;
        txn.put_meta(meta_keys::OUTBOX_SEQ, &id)?;

        let entry = OutboxEntry {
            id,
            op,
            synced: false,
            enqueued_at: self.clock.now_ms(),
        };
        txn.put_outbox(entry.clone());
        Ok(entry)
    }

    /// Appends `op` in its own transaction and raises the flush signal.
    pub fn enqueue(&self, op: Operation) -> StoreResult<OutboxEntry> {
        let entry = self.store.transaction(|txn| self.enqueue_in(txn, op))?;
        debug!(id = entry.id, kind = entry.op.kind(), "operation queued");
        self.signal();
        Ok(entry)
    }

    /// Wakes whoever waits on [`Outbox::flush_signal`].
    pub fn signal(&self) {
        self.flush.notify_one();
    }

    /// Signal raised after operations are committed to the queue.
    pub fn flush_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.flush)
    }

    /// Oldest pending entries, at most `limit`.
    pub fn pending_batch(&self, limit: usize) -> Vec<OutboxEntry> {
        self.store.unsynced(limit)
    }

    /// Number of pending entries.
    pub fn pending_count(&self) -> usize {
        self.store.pending_count()
    }

    /// Marks entries acknowledged and prunes every synced entry, inside the
    /// caller's transaction.
    pub fn acknowledge_in(&self, txn: &mut Txn<'_>, ids: &[u64]) -> usize {
        for &id in ids {
            if let Some(mut entry) = txn.outbox_entry(id) {
                entry.synced = true;
                txn.put_outbox(entry);
            }
        }
        self.prune_synced_in(txn)
    }

    /// Acknowledges entries in their own transaction.
    pub fn acknowledge(&self, ids: &[u64]) -> StoreResult<usize> {
        let pruned = self
            .store
            .transaction(|txn| Ok::<_, StoreError>(self.acknowledge_in(txn, ids)))?;
        debug!(pruned, "outbox entries acknowledged");
        Ok(pruned)
    }

    fn prune_synced_in(&self, txn: &mut Txn<'_>) -> usize {
        let synced: Vec<u64> = txn
            .outbox_ids()
            .into_iter()
            .filter(|id| txn.outbox_entry(*id).is_some_and(|e| e.synced))
            .collect();
        for id in &synced {
            txn.delete_outbox(*id);
        }
        synced.len()
    }

    /// Drops every entry, pending or not, inside the caller's transaction.
    ///
    /// Only an explicit local reset may do this.
    pub fn clear_in(&self, txn: &mut Txn<'_>) -> usize {
        let ids = txn.outbox_ids();
        for id in &ids {
            txn.delete_outbox(*id);
        }
        ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use tablesync_protocol::Change;
    use tablesync_storage::InMemoryBackend;

    fn outbox(clock: &ManualClock) -> Outbox {
        let store = Arc::new(DurableStore::in_memory().unwrap());
        Outbox::open(store, Arc::new(clock.clone()), "client-a").unwrap()
    }

    fn set_cell(value: &str) -> Operation {
        Operation::new(
            "T",
            Change::SetCell {
                row_id: "r".into(),
                col: 0,
                value: value.into(),
            },
        )
    }

    #[test]
    fn enqueue_stamps_operation() {
        let clock = ManualClock::new(1_000);
        let outbox = outbox(&clock);

        let entry = outbox.enqueue(set_cell("x")).unwrap();
        assert_eq!(entry.id, 1);
        assert_eq!(entry.op.ts, Some(1_000));
        assert_eq!(entry.op.client_id.as_deref(), Some("client-a"));
        assert!(!entry.synced);

        let preset = set_cell("y").stamped(5, "someone-else");
        let entry = outbox.enqueue(preset).unwrap();
        assert_eq!(entry.id, 2);
        assert_eq!(entry.op.ts, Some(5));
        assert_eq!(entry.op.client_id.as_deref(), Some("someone-else"));
    }

    #[test]
    fn timestamps_strictly_increase() {
        let clock = ManualClock::new(500);
        let outbox = outbox(&clock);
        assert_eq!(outbox.next_timestamp(None), 500);
        assert_eq!(outbox.next_timestamp(None), 501);
        clock.set_ms(100);
        assert_eq!(outbox.next_timestamp(None), 502);
        assert_eq!(outbox.next_timestamp(Some(900)), 901);
    }

    #[test]
    fn pending_batch_is_fifo_and_bounded() {
        let clock = ManualClock::new(1);
        let outbox = outbox(&clock);
        for v in ["a", "b", "c"] {
            outbox.enqueue(set_cell(v)).unwrap();
        }
        let batch: Vec<u64> = outbox.pending_batch(2).iter().map(|e| e.id).collect();
        assert_eq!(batch, vec![1, 2]);
        assert_eq!(outbox.pending_count(), 3);
    }

    #[test]
    fn acknowledge_prunes_only_acked_entries() {
        let clock = ManualClock::new(1);
        let outbox = outbox(&clock);
        for v in ["a", "b", "c"] {
            outbox.enqueue(set_cell(v)).unwrap();
        }
        assert_eq!(outbox.acknowledge(&[1, 2, 99]).unwrap(), 2);
        let left: Vec<u64> = outbox.pending_batch(10).iter().map(|e| e.id).collect();
        assert_eq!(left, vec![3]);
    }

    #[test]
    fn ids_are_not_reused_after_restart() {
        let backend = InMemoryBackend::new();
        let handle = backend.handle();
        let clock = ManualClock::new(1);
        {
            let store = Arc::new(
                DurableStore::with_backend(Box::new(backend), StoreConfig::default()).unwrap(),
            );
            let outbox = Outbox::open(store, Arc::new(clock.clone()), "c").unwrap();
            outbox.enqueue(set_cell("a")).unwrap();
            outbox.enqueue(set_cell("b")).unwrap();
            outbox.acknowledge(&[1, 2]).unwrap();
        }

        let store =
            Arc::new(DurableStore::with_backend(Box::new(handle), StoreConfig::default()).unwrap());
        let outbox = Outbox::open(store, Arc::new(clock), "c").unwrap();
        assert_eq!(outbox.pending_count(), 0);
        assert_eq!(outbox.enqueue(set_cell("c")).unwrap().id, 3);
    }

    #[test]
    fn timestamps_keep_increasing_after_restart() {
        let backend = InMemoryBackend::new();
        let handle = backend.handle();
        let clock = ManualClock::new(1_000);
        {
            let store = Arc::new(
                DurableStore::with_backend(Box::new(backend), StoreConfig::default()).unwrap(),
            );
            let outbox = Outbox::open(store, Arc::new(clock.clone()), "c").unwrap();
            let ts = outbox.next_timestamp(Some(9_000_000));
            assert_eq!(ts, 9_000_001);
            outbox.enqueue(set_cell("a").stamped(ts, "c")).unwrap();
            outbox.enqueue(set_cell("b").stamped(50, "other")).unwrap();
        }

        let store =
            Arc::new(DurableStore::with_backend(Box::new(handle), StoreConfig::default()).unwrap());
        let outbox = Outbox::open(store, Arc::new(clock), "c").unwrap();
        assert_eq!(outbox.next_timestamp(None), 9_000_002);
        assert_eq!(outbox.enqueue(set_cell("c")).unwrap().op.ts, Some(9_000_003));
    }

    #[test]
    fn failed_enqueue_is_not_visible() {
        let backend = InMemoryBackend::new();
        let handle = backend.handle();
        let store =
            Arc::new(DurableStore::with_backend(Box::new(backend), StoreConfig::default()).unwrap());
        let outbox = Outbox::open(store, Arc::new(ManualClock::new(1)), "c").unwrap();

        handle.fail_next_appends(1);
        assert!(outbox.enqueue(set_cell("a")).is_err());
        assert_eq!(outbox.pending_count(), 0);
        assert_eq!(outbox.enqueue(set_cell("a")).unwrap().id, 1);
    }

    #[tokio::test]
    async fn enqueue_raises_flush_signal() {
        let clock = ManualClock::new(1);
        let outbox = outbox(&clock);
        let signal = outbox.flush_signal();
        outbox.enqueue(set_cell("a")).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
            .await
            .unwrap();
    }
}
