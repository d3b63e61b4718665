//! The in-memory table view and its single mutation path.
//!
//! Every change to tables goes through [`StateStore`]: local edits and
//! remote batches alike. A change is validated against a copy of the
//! affected table, committed to the durable store together with its outbox
//! entries, swapped into memory, and only then announced on the event bus.
//! A writer lock serializes these steps, so memory never runs ahead of or
//! behind the journal.

use crate::clock::Clock;
use crate::config::{Settings, SyncConfig};
use crate::conflict::ConflictTracker;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, StateEvent};
use crate::outbox::Outbox;
use crate::reconciler::{ApplyReport, Reconciler, WorkingSet};
use crate::store::{meta_keys, DurableStore};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tablesync_protocol::{
    CellConflict, CellMeta, Change, Cursor, Delta, Operation, ProtocolError, Table,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything one authority response asks the replica to apply.
#[derive(Debug, Clone, Default)]
pub struct RemoteBatch {
    /// Remote edits in authority order.
    pub deltas: Vec<Delta>,
    /// Full tables to install when absent locally.
    pub tables: Vec<Table>,
    /// Position the response covers.
    pub cursor: Cursor,
    /// Outbox entries the response acknowledges.
    pub acknowledged: Vec<u64>,
}

/// Authoritative in-memory tables of one replica.
pub struct StateStore {
    store: Arc<DurableStore>,
    outbox: Arc<Outbox>,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    conflicts: Arc<ConflictTracker>,
    events: EventBus,
    tables: RwLock<BTreeMap<String, Table>>,
    writer: Mutex<()>,
}

impl StateStore {
    /// Loads the replica held by `store`.
    ///
    /// A client id is generated and persisted on first use.
    pub fn open(
        store: Arc<DurableStore>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> SyncResult<Self> {
        let client_id = match store.meta::<String>(meta_keys::CLIENT_ID)? {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                store.transaction(|txn| txn.put_meta(meta_keys::CLIENT_ID, &id))?;
                info!(client_id = %id, "generated client id");
                id
            }
        };

        let tables: BTreeMap<String, Table> = store
            .tables()
            .into_iter()
            .map(|table| (table.id.clone(), table))
            .collect();
        info!(
            client_id = %client_id,
            tables = tables.len(),
            pending = store.pending_count(),
            "state loaded"
        );

        let outbox = Arc::new(Outbox::open(
            Arc::clone(&store),
            Arc::clone(&clock),
            client_id.as_str(),
        )?);
        let conflicts = Arc::new(ConflictTracker::new(config.conflict_window, Arc::clone(&clock)));

        Ok(Self {
            store,
            outbox,
            clock,
            reconciler: Reconciler::new(client_id),
            conflicts,
            events: EventBus::new(),
            tables: RwLock::new(tables),
            writer: Mutex::new(()),
        })
    }

    /// This replica's client id.
    pub fn client_id(&self) -> &str {
        self.outbox.client_id()
    }

    /// The outbox queue fed by local edits.
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// The underlying durable store.
    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    /// Returns a copy of a table.
    pub fn table(&self, table_id: &str) -> Option<Table> {
        self.tables.read().get(table_id).cloned()
    }

    /// Returns copies of every table ordered by id.
    pub fn tables(&self) -> Vec<Table> {
        self.tables.read().values().cloned().collect()
    }

    /// Ids of every table.
    pub fn table_ids(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Last cursor whose deltas are durably applied.
    pub fn cursor(&self) -> SyncResult<Cursor> {
        Ok(self
            .store
            .meta::<Cursor>(meta_keys::SYNC_CURSOR)?
            .unwrap_or_default())
    }

    /// Live cell conflicts.
    pub fn conflicts(&self) -> Vec<CellConflict> {
        self.conflicts.active()
    }

    /// The conflict tracker.
    pub fn conflict_tracker(&self) -> &Arc<ConflictTracker> {
        &self.conflicts
    }

    /// Subscribes to state events. The first event received is `init`
    /// with the current table ids.
    pub fn subscribe(&self) -> UnboundedReceiver<StateEvent> {
        self.events.subscribe_with(StateEvent::Init {
            table_ids: self.table_ids(),
        })
    }

    /// Publishes an event that is not tied to a table write.
    pub fn publish(&self, event: StateEvent) {
        self.events.publish(event);
    }

    /// Creates an empty table and returns its id.
    pub fn create_table(&self, name: &str, headers: Vec<String>) -> SyncResult<String> {
        let _writer = self.writer.lock();
        let id = Uuid::new_v4().to_string();
        let mut table = Table::new(id.as_str(), name, headers);
        table.touch(self.clock.now_ms());

        let ops = creation_ops(&table);
        self.commit(vec![table], Vec::new(), ops)?;
        self.events.publish(StateEvent::TableCreated {
            table_id: id.clone(),
        });
        Ok(id)
    }

    /// Writes a cell.
    ///
    /// The write is stamped later than whatever the cell holds now, so it
    /// always replaces the value the user saw.
    pub fn set_cell(&self, table_id: &str, row_id: &str, col: usize, value: &str) -> SyncResult<()> {
        self.edit_table(table_id, |table| {
            table.check_column(col)?;
            if table.row(row_id).is_none() {
                return Err(row_not_found(table_id, row_id));
            }
            let floor = table.cell_stamp(row_id, col).map(|stamp| stamp.ts);
            let ts = self.outbox.next_timestamp(floor);
            table.write_cell(row_id, col, CellMeta::new(value, ts, self.client_id()))?;

            let op = Operation::new(
                table_id,
                Change::SetCell {
                    row_id: row_id.to_string(),
                    col,
                    value: value.to_string(),
                },
            )
            .stamped(ts, self.client_id());
            let event = StateEvent::CellUpdated {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
                col,
            };
            Ok(((), vec![op], event))
        })
    }

    /// Inserts an empty row after `after_row_id` (or at the end) and
    /// returns its id.
    pub fn add_row(&self, table_id: &str, after_row_id: Option<&str>) -> SyncResult<String> {
        self.edit_table(table_id, |table| {
            let row_id = Uuid::new_v4().to_string();
            table.insert_row(&row_id, after_row_id);
            let op = Operation::new(
                table_id,
                Change::AddRow {
                    row_id: row_id.clone(),
                    after_row_id: after_row_id.map(str::to_string),
                },
            );
            let event = StateEvent::RowAdded {
                table_id: table_id.to_string(),
                row_id: row_id.clone(),
            };
            Ok((row_id, vec![op], event))
        })
    }

    /// Removes a row.
    pub fn delete_row(&self, table_id: &str, row_id: &str) -> SyncResult<()> {
        self.edit_table(table_id, |table| {
            if !table.remove_row(row_id) {
                return Err(row_not_found(table_id, row_id));
            }
            let op = Operation::new(
                table_id,
                Change::DeleteRow {
                    row_id: row_id.to_string(),
                },
            );
            let event = StateEvent::RowDeleted {
                table_id: table_id.to_string(),
                row_id: row_id.to_string(),
            };
            Ok(((), vec![op], event))
        })
    }

    /// Inserts a column at `col_index`; `col_index` may equal the width to
    /// append.
    pub fn add_column(&self, table_id: &str, col_index: usize, header: &str) -> SyncResult<usize> {
        self.edit_table(table_id, |table| {
            if col_index > table.width() {
                return Err(ProtocolError::ColumnOutOfRange {
                    col: col_index,
                    width: table.width(),
                }
                .into());
            }
            let idx = table.insert_column(col_index, header);
            let op = Operation::new(
                table_id,
                Change::AddColumn {
                    col_index: idx,
                    header: header.to_string(),
                },
            );
            let event = StateEvent::ColumnAdded {
                table_id: table_id.to_string(),
                col_index: idx,
            };
            Ok((idx, vec![op], event))
        })
    }

    /// Removes a column.
    pub fn delete_column(&self, table_id: &str, col_index: usize) -> SyncResult<()> {
        self.edit_table(table_id, |table| {
            table.remove_column(col_index)?;
            let op = Operation::new(table_id, Change::DeleteColumn { col_index });
            let event = StateEvent::ColumnDeleted {
                table_id: table_id.to_string(),
                col_index,
            };
            Ok(((), vec![op], event))
        })
    }

    /// Overwrites a column header.
    pub fn set_header(&self, table_id: &str, col_index: usize, header: &str) -> SyncResult<()> {
        self.edit_table(table_id, |table| {
            table.set_header(col_index, header)?;
            let op = Operation::new(
                table_id,
                Change::SetHeader {
                    col_index,
                    header: header.to_string(),
                },
            );
            let event = StateEvent::HeaderUpdated {
                table_id: table_id.to_string(),
                col_index,
            };
            Ok(((), vec![op], event))
        })
    }

    /// Renames a table.
    pub fn rename_table(&self, table_id: &str, name: &str) -> SyncResult<()> {
        self.edit_table(table_id, |table| {
            table.name = name.to_string();
            let op = Operation::new(
                table_id,
                Change::RenameTable {
                    name: name.to_string(),
                },
            );
            let event = StateEvent::TableUpdated {
                table_ids: vec![table_id.to_string()],
            };
            Ok(((), vec![op], event))
        })
    }

    /// Removes a table.
    pub fn delete_table(&self, table_id: &str) -> SyncResult<()> {
        let _writer = self.writer.lock();
        if !self.tables.read().contains_key(table_id) {
            return Err(ProtocolError::TableNotFound(table_id.to_string()).into());
        }
        let op = Operation::new(table_id, Change::DeleteTable);
        self.commit(Vec::new(), vec![table_id.to_string()], vec![op])?;
        self.events.publish(StateEvent::TableDeleted {
            table_id: table_id.to_string(),
        });
        Ok(())
    }

    /// Imports whole tables and returns the ids they were stored under.
    ///
    /// Every table is validated before anything is written. A table keeps
    /// its id unless that id is empty or already taken locally.
    pub fn import_tables(&self, tables: Vec<Table>) -> SyncResult<Vec<String>> {
        for table in &tables {
            table.check_shape()?;
        }

        let _writer = self.writer.lock();
        let now = self.clock.now_ms();
        let mut imported = Vec::with_capacity(tables.len());
        let mut ops = Vec::new();
        {
            let existing = self.tables.read();
            for mut table in tables {
                if table.id.is_empty()
                    || existing.contains_key(&table.id)
                    || imported.iter().any(|t: &Table| t.id == table.id)
                {
                    table.id = Uuid::new_v4().to_string();
                }
                table.normalize();
                for row in &mut table.rows {
                    if row.row_id.is_empty() {
                        row.row_id = Uuid::new_v4().to_string();
                    }
                }
                table.touch(now);
                ops.extend(creation_ops(&table));
                self.stamp_imported_rows(&mut table, &mut ops);
                imported.push(table);
            }
        }

        let ids: Vec<String> = imported.iter().map(|t| t.id.clone()).collect();
        self.commit(imported, Vec::new(), ops)?;
        info!(tables = ids.len(), "tables imported");
        self.events.publish(StateEvent::DataImported {
            table_ids: ids.clone(),
        });
        Ok(ids)
    }

    fn stamp_imported_rows(&self, table: &mut Table, ops: &mut Vec<Operation>) {
        let mut after: Option<String> = None;
        for row in &mut table.rows {
            ops.push(Operation::new(
                table.id.as_str(),
                Change::AddRow {
                    row_id: row.row_id.clone(),
                    after_row_id: after.clone(),
                },
            ));
            for (col, value) in row.cells.iter().enumerate() {
                if value.is_empty() {
                    row.cell_meta[col] = None;
                    continue;
                }
                let ts = self.outbox.next_timestamp(None);
                row.cell_meta[col] = Some(CellMeta::new(value.as_str(), ts, self.client_id()));
                ops.push(
                    Operation::new(
                        table.id.as_str(),
                        Change::SetCell {
                            row_id: row.row_id.clone(),
                            col,
                            value: value.clone(),
                        },
                    )
                    .stamped(ts, self.client_id()),
                );
            }
            after = Some(row.row_id.clone());
        }
    }

    /// Deletes every table, pending operation, conflict and the sync cursor.
    ///
    /// Nothing is queued for the authority; the next sync starts from the
    /// origin.
    pub fn clear_all(&self) -> SyncResult<()> {
        let _writer = self.writer.lock();
        let dropped = self.store.transaction(|txn| {
            for id in txn.table_ids() {
                txn.delete_table(&id);
            }
            txn.delete_meta(meta_keys::SYNC_CURSOR);
            Ok::<_, SyncError>(self.outbox.clear_in(txn))
        })?;
        self.tables.write().clear();
        self.conflicts.clear();
        info!(dropped_ops = dropped, "local data cleared");
        self.events.publish(StateEvent::DataCleared);
        Ok(())
    }

    /// Persisted settings.
    pub fn settings(&self) -> SyncResult<Settings> {
        let defaults = Settings::default();
        Ok(Settings {
            server_url: self.store.meta::<String>(meta_keys::SERVER_URL)?,
            auto_sync: self
                .store
                .meta::<bool>(meta_keys::AUTO_SYNC)?
                .unwrap_or(defaults.auto_sync),
        })
    }

    /// Replaces the persisted settings.
    pub fn update_settings(&self, settings: Settings) -> SyncResult<()> {
        self.store.transaction(|txn| {
            match &settings.server_url {
                Some(url) => txn.put_meta(meta_keys::SERVER_URL, url)?,
                None => txn.delete_meta(meta_keys::SERVER_URL),
            }
            txn.put_meta(meta_keys::AUTO_SYNC, &settings.auto_sync)?;
            Ok::<_, SyncError>(())
        })?;
        self.events.publish(StateEvent::SettingsUpdated { settings });
        Ok(())
    }

    /// Applies one authority response in a single durable commit.
    ///
    /// Acknowledged outbox entries are pruned, deltas and snapshot tables
    /// are merged, and the cursor advances, all in the same transaction.
    /// One `tableUpdated` event follows if any table changed.
    pub fn apply_remote(&self, batch: RemoteBatch) -> SyncResult<ApplyReport> {
        let _writer = self.writer.lock();
        let now = self.clock.now_ms();
        let applied = self.cursor()?;

        let (changes, mut report) = {
            let tables = self.tables.read();
            let mut set = WorkingSet::new(&tables);
            let report =
                self.reconciler
                    .apply_batch(&mut set, &batch.tables, &batch.deltas, &applied, now);
            (set.into_changes(), report)
        };
        let cursor = report.cursor.clone().max(batch.cursor);

        report.acknowledged = self.store.transaction(|txn| {
            let acknowledged = self.outbox.acknowledge_in(txn, &batch.acknowledged);
            for (id, table) in &changes {
                match table {
                    Some(table) => txn.put_table(table.clone()),
                    None => txn.delete_table(id),
                }
            }
            if cursor > applied {
                txn.put_meta(meta_keys::SYNC_CURSOR, &cursor)?;
            }
            Ok::<_, SyncError>(acknowledged)
        })?;
        report.cursor = cursor;

        {
            let mut tables = self.tables.write();
            for (id, table) in changes {
                match table {
                    Some(table) => {
                        tables.insert(id, table);
                    }
                    None => {
                        tables.remove(&id);
                    }
                }
            }
        }

        for conflict in &report.conflicts {
            info!(
                table_id = %conflict.key.table_id,
                row_id = %conflict.key.row_id,
                col = conflict.key.col,
                "remote write lost to local value"
            );
            self.conflicts.record(conflict.clone());
        }

        debug!(
            applied = report.applied,
            skipped = report.skipped,
            conflicts = report.conflicts.len(),
            cursor = %report.cursor,
            "remote batch applied"
        );
        if !report.touched.is_empty() {
            self.events.publish(StateEvent::TableUpdated {
                table_ids: report.touched.clone(),
            });
        }
        Ok(report)
    }

    /// Runs a local edit against a copy of one table, then commits it.
    fn edit_table<R>(
        &self,
        table_id: &str,
        edit: impl FnOnce(&mut Table) -> SyncResult<(R, Vec<Operation>, StateEvent)>,
    ) -> SyncResult<R> {
        let _writer = self.writer.lock();
        let mut table = self
            .table(table_id)
            .ok_or_else(|| ProtocolError::TableNotFound(table_id.to_string()))?;

        let (result, ops, event) = edit(&mut table)?;
        table.touch(self.clock.now_ms());

        self.commit(vec![table], Vec::new(), ops)?;
        self.events.publish(event);
        Ok(result)
    }

    /// Persists table writes with their operations, then updates memory.
    /// Callers hold the writer lock.
    fn commit(&self, puts: Vec<Table>, deletes: Vec<String>, ops: Vec<Operation>) -> SyncResult<()> {
        let queued = ops.len();
        self.store.transaction(|txn| {
            for table in &puts {
                txn.put_table(table.clone());
            }
            for id in &deletes {
                txn.delete_table(id);
            }
            for op in ops {
                self.outbox.enqueue_in(txn, op)?;
            }
            Ok::<_, SyncError>(())
        })?;

        {
            let mut tables = self.tables.write();
            for id in &deletes {
                tables.remove(id);
            }
            for table in puts {
                tables.insert(table.id.clone(), table);
            }
        }

        if queued > 0 {
            debug!(queued, "local edit committed");
            self.outbox.signal();
        }
        Ok(())
    }
}

/// Operations that rebuild `table`'s name and headers on another replica.
fn creation_ops(table: &Table) -> Vec<Operation> {
    let mut ops = vec![Operation::new(
        table.id.as_str(),
        Change::RenameTable {
            name: table.name.clone(),
        },
    )];
    ops.extend(table.headers.iter().enumerate().map(|(col_index, header)| {
        Operation::new(
            table.id.as_str(),
            Change::AddColumn {
                col_index,
                header: header.clone(),
            },
        )
    }));
    ops
}

fn row_not_found(table_id: &str, row_id: &str) -> SyncError {
    ProtocolError::RowNotFound {
        table_id: table_id.to_string(),
        row_id: row_id.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use tablesync_storage::InMemoryBackend;

    fn open(clock: &ManualClock) -> StateStore {
        let store = Arc::new(DurableStore::in_memory().unwrap());
        StateStore::open(store, Arc::new(clock.clone()), &SyncConfig::default()).unwrap()
    }

    fn remote(change: Change, table_id: &str, ts: u64, cursor: &str) -> Delta {
        Delta {
            table_id: table_id.into(),
            change,
            ts,
            by: "remote".into(),
            cursor: Some(Cursor::new(cursor)),
        }
    }

    fn kinds(state: &StateStore) -> Vec<&'static str> {
        state
            .outbox()
            .pending_batch(usize::MAX)
            .iter()
            .map(|e| e.op.kind())
            .collect()
    }

    #[test]
    fn create_table_queues_rebuild_ops() {
        let clock = ManualClock::new(1_000);
        let state = open(&clock);
        let mut events = state.subscribe();

        let id = state
            .create_table("People", vec!["name".into(), "age".into()])
            .unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::Init { table_ids: vec![] }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::TableCreated {
                table_id: id.clone()
            }
        );
        assert_eq!(kinds(&state), ["renameTable", "addColumn", "addColumn"]);
        assert_eq!(state.table(&id).unwrap().version, 1);
    }

    #[test]
    fn set_cell_stamps_cell_like_its_operation() {
        let clock = ManualClock::new(1_000);
        let state = open(&clock);
        let id = state.create_table("T", vec!["a".into()]).unwrap();
        let row = state.add_row(&id, None).unwrap();

        state.set_cell(&id, &row, 0, "hello").unwrap();

        let table = state.table(&id).unwrap();
        let stamp = table.cell_stamp(&row, 0).unwrap();
        let queued = state.outbox().pending_batch(usize::MAX);
        let op = &queued.last().unwrap().op;
        assert_eq!(op.ts, Some(stamp.ts));
        assert_eq!(op.client_id.as_deref(), Some(state.client_id()));
        assert_eq!(table.cell(&row, 0), Some("hello"));
    }

    #[test]
    fn local_write_supersedes_future_remote_stamp() {
        let clock = ManualClock::new(1_000);
        let state = open(&clock);
        let id = state.create_table("T", vec!["a".into()]).unwrap();
        let row = state.add_row(&id, None).unwrap();

        let far_future = remote(
            Change::SetCell {
                row_id: row.clone(),
                col: 0,
                value: "theirs".into(),
            },
            &id,
            9_999_999,
            "1",
        );
        state
            .apply_remote(RemoteBatch {
                deltas: vec![far_future],
                ..RemoteBatch::default()
            })
            .unwrap();

        state.set_cell(&id, &row, 0, "mine").unwrap();
        let stamp = state.table(&id).unwrap().cell_stamp(&row, 0).unwrap();
        assert!(stamp.ts > 9_999_999);
    }

    #[test]
    fn invalid_edits_change_nothing() {
        let clock = ManualClock::new(1);
        let state = open(&clock);
        let id = state.create_table("T", vec!["a".into()]).unwrap();
        let before = state.table(&id).unwrap();
        let pending = state.outbox().pending_count();

        assert!(matches!(
            state.set_cell(&id, "nope", 0, "x"),
            Err(SyncError::Validation(ProtocolError::RowNotFound { .. }))
        ));
        assert!(state.delete_column(&id, 5).is_err());
        assert!(state.add_column(&id, 3, "h").is_err());
        assert!(matches!(
            state.rename_table("missing", "x"),
            Err(SyncError::Validation(ProtocolError::TableNotFound(_)))
        ));

        assert_eq!(state.table(&id).unwrap(), before);
        assert_eq!(state.outbox().pending_count(), pending);
    }

    #[test]
    fn rename_and_header_edits_announce_distinct_events() {
        let clock = ManualClock::new(1);
        let state = open(&clock);
        let id = state.create_table("T", vec!["a".into()]).unwrap();
        let mut events = state.subscribe();
        events.try_recv().unwrap();

        state.rename_table(&id, "Renamed").unwrap();
        state.set_header(&id, 0, "first").unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::TableUpdated {
                table_ids: vec![id.clone()]
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::HeaderUpdated {
                table_id: id.clone(),
                col_index: 0
            }
        );
        assert_eq!(state.table(&id).unwrap().name, "Renamed");
    }

    #[test]
    fn structural_edits_keep_rows_rectangular() {
        let clock = ManualClock::new(1);
        let state = open(&clock);
        let id = state.create_table("T", vec!["a".into(), "b".into()]).unwrap();
        let r1 = state.add_row(&id, None).unwrap();
        state.add_row(&id, Some(&r1)).unwrap();

        assert_eq!(state.add_column(&id, 1, "mid").unwrap(), 1);
        state.delete_column(&id, 0).unwrap();
        state.set_header(&id, 0, "first").unwrap();

        let table = state.table(&id).unwrap();
        assert_eq!(table.headers, ["first", "b"]);
        table.check_shape().unwrap();
    }

    #[test]
    fn remote_batch_emits_one_event() {
        let clock = ManualClock::new(1);
        let state = open(&clock);
        let mut events = state.subscribe();
        events.try_recv().unwrap();

        let deltas = vec![
            remote(Change::RenameTable { name: "Shared".into() }, "S", 5, "1"),
            remote(Change::AddColumn { col_index: 0, header: "h".into() }, "S", 6, "2"),
            remote(
                Change::AddRow {
                    row_id: "r".into(),
                    after_row_id: None,
                },
                "S",
                7,
                "3",
            ),
            remote(
                Change::SetCell {
                    row_id: "r".into(),
                    col: 0,
                    value: "v".into(),
                },
                "S",
                8,
                "4",
            ),
        ];
        let report = state
            .apply_remote(RemoteBatch {
                deltas,
                cursor: Cursor::new("4"),
                ..RemoteBatch::default()
            })
            .unwrap();

        assert_eq!(report.applied, 4);
        assert_eq!(state.table("S").unwrap().cell("r", 0), Some("v"));
        assert_eq!(state.cursor().unwrap(), Cursor::new("4"));
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::TableUpdated {
                table_ids: vec!["S".into()]
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn stale_remote_write_is_flagged() {
        let clock = ManualClock::new(200);
        let state = open(&clock);
        let id = state.create_table("T", vec!["a".into()]).unwrap();
        let row = state.add_row(&id, None).unwrap();
        state.set_cell(&id, &row, 0, "local").unwrap();

        let stale = remote(
            Change::SetCell {
                row_id: row.clone(),
                col: 0,
                value: "old".into(),
            },
            &id,
            50,
            "1",
        );
        let report = state
            .apply_remote(RemoteBatch {
                deltas: vec![stale],
                ..RemoteBatch::default()
            })
            .unwrap();

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(state.table(&id).unwrap().cell(&row, 0), Some("local"));
        assert!(state.conflict_tracker().is_conflicted(&id, &row, 0));
        assert_eq!(state.conflicts()[0].remote_value, "old");
    }

    #[test]
    fn acknowledged_entries_are_pruned_with_the_batch() {
        let clock = ManualClock::new(1);
        let state = open(&clock);
        state.create_table("T", vec![]).unwrap();
        let ids: Vec<u64> = state
            .outbox()
            .pending_batch(10)
            .iter()
            .map(|e| e.id)
            .collect();

        let report = state
            .apply_remote(RemoteBatch {
                cursor: Cursor::new("7"),
                acknowledged: ids,
                ..RemoteBatch::default()
            })
            .unwrap();
        assert_eq!(report.acknowledged, 1);
        assert_eq!(state.outbox().pending_count(), 0);
        assert_eq!(state.cursor().unwrap(), Cursor::new("7"));
    }

    #[test]
    fn import_validates_before_writing() {
        let clock = ManualClock::new(1);
        let state = open(&clock);

        let mut good = Table::new("", "Good", vec!["a".into(), "b".into()]);
        good.insert_row("r1", None);
        good.rows[0].cells = vec!["x".into(), String::new()];
        let mut bad = Table::new("bad", "Bad", vec!["a".into()]);
        bad.insert_row("r1", None);
        bad.rows[0].cells.push("extra".into());

        assert!(matches!(
            state.import_tables(vec![good.clone(), bad]),
            Err(SyncError::Validation(ProtocolError::RowWidthMismatch { .. }))
        ));
        assert!(state.tables().is_empty());
        assert_eq!(state.outbox().pending_count(), 0);

        let ids = state.import_tables(vec![good]).unwrap();
        let table = state.table(&ids[0]).unwrap();
        assert!(!table.id.is_empty());
        assert!(table.cell_stamp("r1", 0).is_some());
        assert!(table.cell_stamp("r1", 1).is_none());
        assert_eq!(
            kinds(&state),
            ["renameTable", "addColumn", "addColumn", "addRow", "setCell"]
        );
    }

    #[test]
    fn clear_all_resets_everything_but_identity() {
        let clock = ManualClock::new(1);
        let state = open(&clock);
        let client_id = state.client_id().to_string();
        state.create_table("T", vec!["a".into()]).unwrap();
        state
            .apply_remote(RemoteBatch {
                cursor: Cursor::new("3"),
                ..RemoteBatch::default()
            })
            .unwrap();
        let mut events = state.subscribe();
        events.try_recv().unwrap();

        state.clear_all().unwrap();

        assert!(state.tables().is_empty());
        assert_eq!(state.outbox().pending_count(), 0);
        assert!(state.cursor().unwrap().is_origin());
        assert_eq!(state.client_id(), client_id);
        assert_eq!(events.try_recv().unwrap(), StateEvent::DataCleared);
    }

    #[test]
    fn settings_round_trip_through_meta() {
        let clock = ManualClock::new(1);
        let state = open(&clock);
        assert_eq!(state.settings().unwrap(), Settings::default());

        let settings = Settings {
            server_url: Some("http://localhost:3000".into()),
            auto_sync: false,
        };
        state.update_settings(settings.clone()).unwrap();
        assert_eq!(state.settings().unwrap(), settings);
    }

    #[test]
    fn reopen_restores_identity_tables_and_queue() {
        let backend = InMemoryBackend::new();
        let handle = backend.handle();
        let clock = ManualClock::new(1);
        let (client_id, table_id) = {
            let store = Arc::new(
                DurableStore::with_backend(Box::new(backend), StoreConfig::default()).unwrap(),
            );
            let state =
                StateStore::open(store, Arc::new(clock.clone()), &SyncConfig::default()).unwrap();
            let id = state.create_table("T", vec!["a".into()]).unwrap();
            (state.client_id().to_string(), id)
        };

        let store =
            Arc::new(DurableStore::with_backend(Box::new(handle), StoreConfig::default()).unwrap());
        let state = StateStore::open(store, Arc::new(clock), &SyncConfig::default()).unwrap();
        assert_eq!(state.client_id(), client_id);
        assert!(state.table(&table_id).is_some());
        assert_eq!(state.outbox().pending_count(), 2);
    }
}
