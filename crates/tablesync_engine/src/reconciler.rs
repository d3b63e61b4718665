//! Merges remote deltas into local tables.
//!
//! Cell writes are resolved per cell with last-writer-wins over
//! [`Stamp`](tablesync_protocol::Stamp). Structural deltas are applied
//! unconditionally and are no-ops when their effect is already present.
//!
//! Merging is pure: it reads a base set of tables, stages changes in a
//! [`WorkingSet`] and reports conflicts, leaving persistence and
//! notification to the caller.

use std::collections::{BTreeMap, BTreeSet};
use tablesync_protocol::{
    CellConflict, Change, ConflictKey, Cursor, Delta, LwwDecision, Table,
};
use tracing::debug;

/// Why a delta left state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Written by this replica; already applied at edit time.
    OwnWrite,
    /// Its position is not after the cursor already applied.
    Replay,
    /// The table does not exist.
    UnknownTable,
    /// The row does not exist.
    MissingRow,
    /// The column does not exist.
    ColumnOutOfRange,
    /// The cell already holds this exact write.
    Duplicate,
    /// The row already exists.
    AlreadyPresent,
    /// The table was just installed from a snapshot that includes the delta.
    CoveredBySnapshot,
}

/// Result of merging one delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// State changed.
    Applied,
    /// The remote cell write lost to the stored one.
    Conflict(CellConflict),
    /// Nothing changed.
    Skipped(SkipReason),
}

/// Copy-on-write view over a base set of tables.
///
/// A table is cloned the first time it is modified; untouched tables are
/// only borrowed.
#[derive(Debug)]
pub struct WorkingSet<'a> {
    base: &'a BTreeMap<String, Table>,
    staged: BTreeMap<String, Option<Table>>,
}

impl<'a> WorkingSet<'a> {
    /// Starts a working set over `base`.
    pub fn new(base: &'a BTreeMap<String, Table>) -> Self {
        Self {
            base,
            staged: BTreeMap::new(),
        }
    }

    /// Returns the current version of a table.
    pub fn get(&self, id: &str) -> Option<&Table> {
        match self.staged.get(id) {
            Some(staged) => staged.as_ref(),
            None => self.base.get(id),
        }
    }

    /// Returns true if the table exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Returns a mutable table, cloning it from the base on first use.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Table> {
        if !self.staged.contains_key(id) {
            let table = self.base.get(id)?.clone();
            self.staged.insert(id.to_string(), Some(table));
        }
        self.staged.get_mut(id).and_then(Option::as_mut)
    }

    /// Inserts or replaces a table.
    pub fn insert(&mut self, table: Table) {
        self.staged.insert(table.id.clone(), Some(table));
    }

    /// Removes a table. Returns false if it did not exist.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.staged.insert(id.to_string(), None);
        true
    }

    /// Ids of every table written or removed.
    pub fn touched(&self) -> Vec<String> {
        self.staged.keys().cloned().collect()
    }

    /// Consumes the set, returning staged tables (`None` for removals).
    pub fn into_changes(self) -> BTreeMap<String, Option<Table>> {
        self.staged
    }
}

/// Counts and conflicts gathered while merging a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Deltas that changed state.
    pub applied: usize,
    /// Deltas skipped without effect.
    pub skipped: usize,
    /// Tables installed from a snapshot.
    pub snapshot_tables: usize,
    /// Remote cell writes that lost.
    pub conflicts: Vec<CellConflict>,
    /// Tables written or removed.
    pub touched: Vec<String>,
    /// Outbox entries acknowledged in the same commit.
    pub acknowledged: usize,
    /// Highest cursor covered by the batch.
    pub cursor: Cursor,
}

/// The merge rules of one replica.
#[derive(Debug, Clone)]
pub struct Reconciler {
    client_id: String,
}

impl Reconciler {
    /// Creates a reconciler for the replica `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }

    /// Merges a snapshot and a list of deltas into `set`.
    ///
    /// Snapshot tables are installed only when absent; deltas for a table
    /// installed this way are already reflected in it and are skipped.
    /// `applied` is the cursor whose deltas are already in the base.
    pub fn apply_batch(
        &self,
        set: &mut WorkingSet<'_>,
        snapshot: &[Table],
        deltas: &[Delta],
        applied: &Cursor,
        now_ms: u64,
    ) -> ApplyReport {
        let mut report = ApplyReport {
            cursor: applied.clone(),
            ..ApplyReport::default()
        };

        let mut installed = BTreeSet::new();
        for table in snapshot {
            if set.contains(&table.id) {
                continue;
            }
            let mut table = table.clone();
            table.normalize();
            installed.insert(table.id.clone());
            set.insert(table);
        }
        report.snapshot_tables = installed.len();

        for delta in deltas {
            let outcome = if installed.contains(&delta.table_id) {
                if let Some(cursor) = &delta.cursor {
                    report.cursor = report.cursor.clone().max(cursor.clone());
                }
                DeltaOutcome::Skipped(SkipReason::CoveredBySnapshot)
            } else {
                self.merge(set, delta, &mut report.cursor, now_ms)
            };

            match outcome {
                DeltaOutcome::Applied => report.applied += 1,
                DeltaOutcome::Conflict(conflict) => report.conflicts.push(conflict),
                DeltaOutcome::Skipped(reason) => {
                    debug!(
                        table_id = %delta.table_id,
                        kind = delta.kind(),
                        ?reason,
                        "delta skipped"
                    );
                    report.skipped += 1;
                }
            }
        }

        report.touched = set.touched();
        report
    }

    /// Merges one delta into `set`, advancing `applied` past its position.
    pub fn merge(
        &self,
        set: &mut WorkingSet<'_>,
        delta: &Delta,
        applied: &mut Cursor,
        now_ms: u64,
    ) -> DeltaOutcome {
        if let Some(cursor) = &delta.cursor {
            if cursor <= applied {
                return DeltaOutcome::Skipped(SkipReason::Replay);
            }
            *applied = cursor.clone();
        }
        if delta.by == self.client_id {
            return DeltaOutcome::Skipped(SkipReason::OwnWrite);
        }

        let table_id = delta.table_id.as_str();

        if let Change::RenameTable { name } = &delta.change {
            match set.get_mut(table_id) {
                Some(table) => {
                    table.name = name.clone();
                    table.touch(now_ms);
                }
                None => {
                    let mut table = Table::new(table_id, name.clone(), Vec::new());
                    table.touch(now_ms);
                    set.insert(table);
                }
            }
            return DeltaOutcome::Applied;
        }

        if matches!(delta.change, Change::DeleteTable) {
            return if set.remove(table_id) {
                DeltaOutcome::Applied
            } else {
                DeltaOutcome::Skipped(SkipReason::UnknownTable)
            };
        }

        let Some(current) = set.get(table_id) else {
            return DeltaOutcome::Skipped(SkipReason::UnknownTable);
        };
        if let Some(reason) = precheck(current, &delta.change) {
            return DeltaOutcome::Skipped(reason);
        }

        if let Change::SetCell { row_id, col, value } = &delta.change {
            let stored = current.cell_stamp(row_id, *col);
            match delta.stamp().decide(stored.as_ref()) {
                LwwDecision::Apply => {}
                LwwDecision::Duplicate => return DeltaOutcome::Skipped(SkipReason::Duplicate),
                LwwDecision::Stale => {
                    let local = current.cell(row_id, *col).unwrap_or_default();
                    let conflict = CellConflict::new(
                        ConflictKey::new(table_id, row_id.as_str(), *col),
                        local,
                        value.as_str(),
                        now_ms,
                    );
                    return DeltaOutcome::Conflict(conflict);
                }
            }
        }

        let Some(table) = set.get_mut(table_id) else {
            return DeltaOutcome::Skipped(SkipReason::UnknownTable);
        };
        let changed = match &delta.change {
            Change::SetCell { row_id, col, .. } => match delta.cell_meta() {
                Some(meta) => table.write_cell(row_id, *col, meta).is_ok(),
                None => false,
            },
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
            DeltaOutcome::Applied
        } else {
            DeltaOutcome::Skipped(SkipReason::AlreadyPresent)
        }
    }
}

/// Returns why a delta cannot apply to `table`, if it cannot.
fn precheck(table: &Table, change: &Change) -> Option<SkipReason> {
    match change {
        Change::SetCell { row_id, col, .. } => {
            if table.row(row_id).is_none() {
                Some(SkipReason::MissingRow)
            } else if table.check_column(*col).is_err() {
                Some(SkipReason::ColumnOutOfRange)
            } else {
                None
            }
        }
        Change::AddRow { row_id, .. } => table
            .row(row_id)
            .is_some()
            .then_some(SkipReason::AlreadyPresent),
        Change::DeleteRow { row_id } => table.row(row_id).is_none().then_some(SkipReason::MissingRow),
        Change::DeleteColumn { col_index } | Change::SetHeader { col_index, .. } => table
            .check_column(*col_index)
            .is_err()
            .then_some(SkipReason::ColumnOutOfRange),
        Change::AddColumn { .. } | Change::RenameTable { .. } | Change::DeleteTable => None,
    }
}
