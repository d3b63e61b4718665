//! Durable store for tables, the outbox and meta keys.
//!
//! All three collections live in memory and are persisted through a single
//! append-only [`journal`]. A transaction collects its writes, commits them
//! as one journal frame, and only then applies them to the in-memory view,
//! so a commit is either fully visible after a restart or not at all.
//!
//! Writers are serialized by the journal lock; readers never wait on I/O.

mod dir;
pub mod journal;

pub use dir::StoreDir;

/// Keys of the meta collection.
pub mod meta_keys {
    /// This replica's client id.
    pub const CLIENT_ID: &str = "clientId";
    /// Last cursor whose deltas are durably applied.
    pub const SYNC_CURSOR: &str = "syncCursor";
    /// Base URL of the authority.
    pub const SERVER_URL: &str = "serverUrl";
    /// Whether automatic sync is enabled.
    pub const AUTO_SYNC: &str = "autoSync";
    /// Last outbox id handed out.
    pub const OUTBOX_SEQ: &str = "outboxSeq";
    /// Highest timestamp stamped on a local operation.
    pub const LAST_TS: &str = "lastTs";
}

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::outbox::OutboxEntry;
use journal::{Frame, Journal, Write};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tablesync_protocol::Table;
use tablesync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, info, warn};

/// In-memory contents of the three collections.
#[derive(Debug, Default, Clone)]
pub struct Collections {
    tables: BTreeMap<String, Table>,
    outbox: BTreeMap<u64, OutboxEntry>,
    meta: BTreeMap<String, Value>,
    /// Ids of unsynced outbox entries, in enqueue order.
    pending: BTreeSet<u64>,
}

impl Collections {
    /// Looks up a table.
    pub fn table(&self, id: &str) -> Option<&Table> {
        self.tables.get(id)
    }

    /// Iterates tables ordered by id.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Looks up an outbox entry.
    pub fn outbox_entry(&self, id: u64) -> Option<&OutboxEntry> {
        self.outbox.get(&id)
    }

    /// Iterates outbox entries ordered by id.
    pub fn outbox(&self) -> impl Iterator<Item = &OutboxEntry> {
        self.outbox.values()
    }

    /// Raw meta value.
    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Iterates meta keys.
    pub fn meta(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.meta.iter()
    }

    /// Oldest unsynced outbox entries, at most `limit`.
    pub fn unsynced(&self, limit: usize) -> Vec<&OutboxEntry> {
        self.pending
            .iter()
            .filter_map(|id| self.outbox.get(id))
            .take(limit)
            .collect()
    }

    /// Number of unsynced outbox entries.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::PutTable { table } => {
                self.tables.insert(table.id.clone(), table);
            }
            Write::DeleteTable { id } => {
                self.tables.remove(&id);
            }
            Write::PutOutbox { entry } => {
                if entry.synced {
                    self.pending.remove(&entry.id);
                } else {
                    self.pending.insert(entry.id);
                }
                self.outbox.insert(entry.id, entry);
            }
            Write::DeleteOutbox { id } => {
                self.pending.remove(&id);
                self.outbox.remove(&id);
            }
            Write::PutMeta { key, value } => {
                self.meta.insert(key, value);
            }
            Write::DeleteMeta { key } => {
                self.meta.remove(&key);
            }
        }
    }

    fn replay(&mut self, frame: Frame) {
        match frame {
            Frame::Commit { writes } => {
                for write in writes {
                    self.apply(write);
                }
            }
            Frame::Snapshot {
                tables,
                outbox,
                meta,
            } => {
                *self = Collections::default();
                for table in tables {
                    self.apply(Write::PutTable { table });
                }
                for entry in outbox {
                    self.apply(Write::PutOutbox { entry });
                }
                self.meta = meta;
            }
        }
    }

    fn snapshot(&self) -> Frame {
        Frame::Snapshot {
            tables: self.tables.values().cloned().collect(),
            outbox: self.outbox.values().cloned().collect(),
            meta: self.meta.clone(),
        }
    }
}

/// A transaction over the durable store.
///
/// Reads see the transaction's own writes. Nothing is persisted or visible
/// to other readers until the closure passed to
/// [`DurableStore::transaction`] returns `Ok`.
pub struct Txn<'a> {
    base: &'a Collections,
    tables: BTreeMap<String, Option<Table>>,
    outbox: BTreeMap<u64, Option<OutboxEntry>>,
    meta: BTreeMap<String, Option<Value>>,
}

impl<'a> Txn<'a> {
    fn new(base: &'a Collections) -> Self {
        Self {
            base,
            tables: BTreeMap::new(),
            outbox: BTreeMap::new(),
            meta: BTreeMap::new(),
        }
    }

    /// Reads a table.
    pub fn table(&self, id: &str) -> Option<Table> {
        match self.tables.get(id) {
            Some(staged) => staged.clone(),
            None => self.base.tables.get(id).cloned(),
        }
    }

    /// Ids of every table visible to this transaction.
    pub fn table_ids(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.base.tables.keys().cloned().collect();
        for (id, staged) in &self.tables {
            if staged.is_some() {
                ids.insert(id.clone());
            } else {
                ids.remove(id);
            }
        }
        ids.into_iter().collect()
    }

    /// Inserts or replaces a table.
    pub fn put_table(&mut self, table: Table) {
        self.tables.insert(table.id.clone(), Some(table));
    }

    /// Removes a table.
    pub fn delete_table(&mut self, id: &str) {
        self.tables.insert(id.to_string(), None);
    }

    /// Reads an outbox entry.
    pub fn outbox_entry(&self, id: u64) -> Option<OutboxEntry> {
        match self.outbox.get(&id) {
            Some(staged) => staged.clone(),
            None => self.base.outbox.get(&id).cloned(),
        }
    }

    /// Ids of every outbox entry visible to this transaction.
    pub fn outbox_ids(&self) -> Vec<u64> {
        let mut ids: BTreeSet<u64> = self.base.outbox.keys().copied().collect();
        for (id, staged) in &self.outbox {
            if staged.is_some() {
                ids.insert(*id);
            } else {
                ids.remove(id);
            }
        }
        ids.into_iter().collect()
    }

    /// Inserts or replaces an outbox entry.
    pub fn put_outbox(&mut self, entry: OutboxEntry) {
        self.outbox.insert(entry.id, Some(entry));
    }

    /// Removes an outbox entry.
    pub fn delete_outbox(&mut self, id: u64) {
        self.outbox.insert(id, None);
    }

    /// Reads and decodes a meta key.
    pub fn meta<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let value = match self.meta.get(key) {
            Some(staged) => staged.clone(),
            None => self.base.meta.get(key).cloned(),
        };
        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Encodes and sets a meta key.
    pub fn put_meta<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> StoreResult<()> {
        let value = serde_json::to_value(value)?;
        self.meta.insert(key.to_string(), Some(value));
        Ok(())
    }

    /// Removes a meta key.
    pub fn delete_meta(&mut self, key: &str) {
        self.meta.insert(key.to_string(), None);
    }

    fn into_writes(self) -> Vec<Write> {
        let mut writes = Vec::new();
        for (id, staged) in self.tables {
            writes.push(match staged {
                Some(table) => Write::PutTable { table },
                None => Write::DeleteTable { id },
            });
        }
        for (id, staged) in self.outbox {
            writes.push(match staged {
                Some(entry) => Write::PutOutbox { entry },
                None => Write::DeleteOutbox { id },
            });
        }
        for (key, staged) in self.meta {
            writes.push(match staged {
                Some(value) => Write::PutMeta { key, value },
                None => Write::DeleteMeta { key },
            });
        }
        writes
    }
}

/// Transactional persistence for the `tables`, `outbox` and `meta`
/// collections.
///
/// # Example
///
/// ```rust
/// use tablesync_engine::DurableStore;
///
/// let store = DurableStore::in_memory().unwrap();
/// store
///     .transaction(|txn| txn.put_meta("clientId", &"c1"))
///     .unwrap();
/// assert_eq!(store.meta::<String>("clientId").unwrap().as_deref(), Some("c1"));
/// ```
pub struct DurableStore {
    journal: Mutex<Journal>,
    state: RwLock<Collections>,
    config: StoreConfig,
    _dir: Option<StoreDir>,
}

impl DurableStore {
    /// Opens a store in `path`, creating it if needed, and replays its
    /// journal.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another handle has the directory
    /// open, or an I/O error.
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = StoreDir::open(path)?;
        let journal_path = dir.journal_path();
        let backend = FileBackend::open(&journal_path)?;
        info!(path = %path.display(), "opening durable store");
        Self::with_parts(Box::new(backend), config, Some(dir))
    }

    /// Creates an empty store that lives only in memory.
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_backend(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Opens a store over an arbitrary backend and replays what it holds.
    pub fn with_backend(backend: Box<dyn StorageBackend>, config: StoreConfig) -> StoreResult<Self> {
        Self::with_parts(backend, config, None)
    }

    fn with_parts(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
        dir: Option<StoreDir>,
    ) -> StoreResult<Self> {
        let path = dir.as_ref().map(StoreDir::journal_path);
        let (journal, frames) = Journal::open(backend, config.sync_on_commit, path)?;

        let mut state = Collections::default();
        for frame in frames {
            state.replay(frame);
        }
        debug!(
            tables = state.tables.len(),
            pending = state.pending.len(),
            "durable store loaded"
        );

        Ok(Self {
            journal: Mutex::new(journal),
            state: RwLock::new(state),
            config,
            _dir: dir,
        })
    }

    /// Runs `f` as one transaction.
    ///
    /// If `f` returns `Ok`, its writes are appended to the journal as one
    /// frame and then applied in memory. If `f` fails or the append fails,
    /// nothing changes.
    pub fn transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<R, E>,
        E: From<StoreError>,
    {
        let mut journal = self.journal.lock();

        let (result, writes) = {
            let state = self.state.read();
            let mut txn = Txn::new(&state);
            let result = f(&mut txn)?;
            (result, txn.into_writes())
        };

        if writes.is_empty() {
            return Ok(result);
        }

        journal.append(&Frame::Commit {
            writes: writes.clone(),
        })?;

        {
            let mut state = self.state.write();
            for write in writes {
                state.apply(write);
            }
        }

        let size = journal.size()?;
        if size > self.config.compact_after_bytes {
            if let Err(err) = self.compact_locked(&mut journal) {
                warn!(error = %err, "journal compaction failed");
            }
        }

        Ok(result)
    }

    /// Reads from the current committed state.
    pub fn read<R>(&self, f: impl FnOnce(&Collections) -> R) -> R {
        f(&self.state.read())
    }

    /// Returns a table.
    pub fn table(&self, id: &str) -> Option<Table> {
        self.state.read().tables.get(id).cloned()
    }

    /// Returns every table ordered by id.
    pub fn tables(&self) -> Vec<Table> {
        self.state.read().tables.values().cloned().collect()
    }

    /// Reads and decodes a meta key.
    pub fn meta<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        let value = self.state.read().meta.get(key).cloned();
        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Oldest unsynced outbox entries, at most `limit`.
    pub fn unsynced(&self, limit: usize) -> Vec<OutboxEntry> {
        self.state
            .read()
            .unsynced(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Number of unsynced outbox entries.
    pub fn pending_count(&self) -> usize {
        self.state.read().pending_count()
    }

    /// Current journal size in bytes.
    pub fn journal_size(&self) -> StoreResult<u64> {
        self.journal.lock().size()
    }

    /// Rewrites the journal as a single snapshot of the current state.
    pub fn compact(&self) -> StoreResult<()> {
        let mut journal = self.journal.lock();
        self.compact_locked(&mut journal)
    }

    fn compact_locked(&self, journal: &mut Journal) -> StoreResult<()> {
        let before = journal.size()?;
        let snapshot = self.state.read().snapshot();
        journal.rewrite(&snapshot)?;
        info!(before, after = journal.size()?, "journal compacted");
        Ok(())
    }
}
