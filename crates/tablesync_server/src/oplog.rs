//! Server-side change log and authoritative tables.

use crate::error::{ServerError, ServerResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tablesync_protocol::{Change, Cursor, Delta, LwwDecision, Operation, Table};

/// Renders a log sequence number as a cursor.
///
/// Positions are zero-padded to 20 digits so that every issued cursor has
/// the same length; sequence 0 is the origin `"0"`.
pub fn cursor_for(seq: u64) -> Cursor {
    if seq == 0 {
        Cursor::origin()
    } else {
        Cursor::new(format!("{seq:020}"))
    }
}

/// Parses a cursor issued by [`cursor_for`].
pub fn parse_cursor(cursor: &Cursor) -> ServerResult<u64> {
    let token = cursor.as_str();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ServerError::InvalidRequest(format!(
            "malformed cursor: {token:?}"
        )));
    }
    token
        .parse()
        .map_err(|_| ServerError::InvalidRequest(format!("cursor out of range: {token}")))
}

/// One accepted operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Position in the log, starting at 1.
    pub seq: u64,
    /// Client that pushed the operation.
    pub pushed_by: String,
    /// The operation as replicas receive it.
    pub delta: Delta,
}

/// Result of appending a push batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Operations recorded in the log.
    pub accepted: usize,
    /// Operations dropped as stale, replayed, or aimed at a missing target.
    pub skipped: usize,
    /// Log head after the batch.
    pub head: u64,
}

#[derive(Debug, Default)]
struct OplogState {
    entries: Vec<LogEntry>,
    tables: BTreeMap<String, Table>,
    seen: HashSet<(String, u64)>,
}

/// Server-side operation log.
///
/// Holds every accepted operation in commit order together with the tables
/// those operations produce. An operation is recorded only if applying it
/// changed the tables, so replicas replaying the log apply exactly what the
/// server applied.
#[derive(Debug, Default)]
pub struct ServerOplog {
    state: RwLock<OplogState>,
}

impl ServerOplog {
    /// Creates an empty oplog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the newest entry, 0 when empty.
    pub fn head(&self) -> u64 {
        self.state.read().entries.len() as u64
    }

    /// Cursor of the newest entry.
    pub fn cursor(&self) -> Cursor {
        cursor_for(self.head())
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if nothing has been accepted.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Applies a push batch in order and records the operations that took
    /// effect.
    ///
    /// Unstamped operations are stamped with `now_ms` and the pushing
    /// client. A stamped operation already processed once is skipped.
    pub fn append(&self, client_id: &str, ops: &[Operation], now_ms: u64) -> AppendOutcome {
        let mut state = self.state.write();
        let mut outcome = AppendOutcome::default();

        for op in ops {
            if let (Some(ts), Some(by)) = (op.ts, op.client_id.as_ref()) {
                if !state.seen.insert((by.clone(), ts)) {
                    outcome.skipped += 1;
                    continue;
                }
            }

            let mut delta = Delta::from_operation(op, client_id, now_ms, None);
            if !apply(&mut state.tables, &delta, now_ms) {
                tracing::debug!(
                    kind = delta.kind(),
                    table_id = %delta.table_id,
                    "operation had no effect"
                );
                outcome.skipped += 1;
                continue;
            }

            let seq = state.entries.len() as u64 + 1;
            delta.cursor = Some(cursor_for(seq));
            state.entries.push(LogEntry {
                seq,
                pushed_by: client_id.to_string(),
                delta,
            });
            outcome.accepted += 1;
        }

        outcome.head = state.entries.len() as u64;
        outcome
    }

    /// Returns deltas after sequence `after`, oldest first.
    ///
    /// Entries pushed by `exclude` are left out. At most `limit` deltas are
    /// returned when a limit is given.
    pub fn deltas_since(&self, after: u64, limit: Option<usize>, exclude: Option<&str>) -> Vec<Delta> {
        let state = self.state.read();
        let start = usize::try_from(after)
            .unwrap_or(usize::MAX)
            .min(state.entries.len());
        state.entries[start..]
            .iter()
            .filter(|entry| exclude != Some(entry.pushed_by.as_str()))
            .take(limit.unwrap_or(usize::MAX))
            .map(|entry| entry.delta.clone())
            .collect()
    }

    /// The newest `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.state
            .read()
            .entries
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Current tables, ordered by id.
    pub fn tables(&self) -> Vec<Table> {
        self.state.read().tables.values().cloned().collect()
    }

    /// Looks up one table.
    pub fn table(&self, table_id: &str) -> Option<Table> {
        self.state.read().tables.get(table_id).cloned()
    }

    /// Drops every entry and table.
    pub fn reset(&self) {
        *self.state.write() = OplogState::default();
    }
}

/// Applies one delta to the server tables. Returns false if nothing changed.
fn apply(tables: &mut BTreeMap<String, Table>, delta: &Delta, now_ms: u64) -> bool {
    if let Change::RenameTable { name } = &delta.change {
        let table = tables
            .entry(delta.table_id.clone())
            .or_insert_with(|| Table::new(delta.table_id.clone(), String::new(), Vec::new()));
        table.name = name.clone();
        table.touch(now_ms);
        return true;
    }
    if let Change::DeleteTable = delta.change {
        return tables.remove(&delta.table_id).is_some();
    }

    let Some(table) = tables.get_mut(&delta.table_id) else {
        return false;
    };
    let changed = match &delta.change {
        Change::SetCell { row_id, col, .. } => {
            if table.check_column(*col).is_err() || table.row(row_id).is_none() {
                false
            } else {
                let stored = table.cell_stamp(row_id, *col);
                match delta.stamp().decide(stored.as_ref()) {
                    LwwDecision::Apply => delta
                        .cell_meta()
                        .map(|meta| table.write_cell(row_id, *col, meta).is_ok())
                        .unwrap_or(false),
                    LwwDecision::Duplicate | LwwDecision::Stale => false,
                }
            }
        }
        Change::AddRow {
            row_id,
            after_row_id,
        } => table.insert_row(row_id, after_row_id.as_deref()),
        Change::DeleteRow { row_id } => table.remove_row(row_id),
        Change::AddColumn { col_index, header } => {
            table.insert_column(*col_index, header.clone());
            true
        }
        Change::DeleteColumn { col_index } => table.remove_column(*col_index).is_ok(),
        Change::SetHeader { col_index, header } => {
            table.set_header(*col_index, header.clone()).is_ok()
        }
        Change::RenameTable { .. } | Change::DeleteTable => false,
    };
    if changed {
        table.touch(now_ms);
    }
    changed
}
