//! Operations (outbound) and deltas (inbound).

use crate::cursor::Cursor;
use crate::model::CellMeta;
use crate::stamp::Stamp;
use serde::{Deserialize, Serialize};

/// One edit to a table.
///
/// On the wire the variant is the `op` field and its fields sit next to it,
/// e.g. `{"op":"setCell","rowId":"r1","col":0,"value":"x"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Change {
    /// Write one cell.
    #[serde(rename_all = "camelCase")]
    SetCell {
        /// Target row.
        row_id: String,
        /// Target column.
        col: usize,
        /// New value.
        value: String,
    },
    /// Insert an empty row.
    #[serde(rename_all = "camelCase")]
    AddRow {
        /// Id of the new row.
        row_id: String,
        /// Row to insert after; appended when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after_row_id: Option<String>,
    },
    /// Remove a row.
    #[serde(rename_all = "camelCase")]
    DeleteRow {
        /// Row to remove.
        row_id: String,
    },
    /// Insert a column.
    #[serde(rename_all = "camelCase")]
    AddColumn {
        /// Position of the new column; appended when out of range.
        col_index: usize,
        /// Header of the new column.
        header: String,
    },
    /// Remove a column.
    #[serde(rename_all = "camelCase")]
    DeleteColumn {
        /// Column to remove.
        col_index: usize,
    },
    /// Overwrite a header.
    #[serde(rename_all = "camelCase")]
    SetHeader {
        /// Column whose header changes.
        col_index: usize,
        /// New header.
        header: String,
    },
    /// Rename the table.
    RenameTable {
        /// New name.
        name: String,
    },
    /// Remove the table.
    DeleteTable,
}

impl Change {
    /// Wire name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Change::SetCell { .. } => "setCell",
            Change::AddRow { .. } => "addRow",
            Change::DeleteRow { .. } => "deleteRow",
            Change::AddColumn { .. } => "addColumn",
            Change::DeleteColumn { .. } => "deleteColumn",
            Change::SetHeader { .. } => "setHeader",
            Change::RenameTable { .. } => "renameTable",
            Change::DeleteTable => "deleteTable",
        }
    }

    /// Returns true for edits that change table shape or identity rather
    /// than a cell value. Structural edits are applied unconditionally.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Change::SetCell { .. })
    }
}

/// A local edit queued for the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Table the edit applies to.
    pub table_id: String,
    /// The edit itself.
    #[serde(flatten)]
    pub change: Change,
    /// Local timestamp, filled in by the outbox when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
    /// Writer id, filled in by the outbox when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Operation {
    /// Creates an unstamped operation.
    pub fn new(table_id: impl Into<String>, change: Change) -> Self {
        Self {
            table_id: table_id.into(),
            change,
            ts: None,
            client_id: None,
        }
    }

    /// Sets the timestamp and writer.
    pub fn stamped(mut self, ts: u64, client_id: impl Into<String>) -> Self {
        self.ts = Some(ts);
        self.client_id = Some(client_id.into());
        self
    }

    /// Wire name of the edit.
    pub fn kind(&self) -> &'static str {
        self.change.kind()
    }
}

/// A remote edit received from the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    /// Table the edit applies to.
    pub table_id: String,
    /// The edit itself.
    #[serde(flatten)]
    pub change: Change,
    /// Writer's timestamp, compared by last-writer-wins.
    pub ts: u64,
    /// Writer's client id, the LWW tie-break.
    pub by: String,
    /// Authoritative position of this delta in the change stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl Delta {
    /// Builds the delta the authority emits for an accepted operation.
    ///
    /// Missing stamp fields fall back to `default_ts` and the pushing
    /// client's id.
    pub fn from_operation(
        op: &Operation,
        pushing_client: &str,
        default_ts: u64,
        cursor: Option<Cursor>,
    ) -> Self {
        Self {
            table_id: op.table_id.clone(),
            change: op.change.clone(),
            ts: op.ts.unwrap_or(default_ts),
            by: op
                .client_id
                .clone()
                .unwrap_or_else(|| pushing_client.to_string()),
            cursor,
        }
    }

    /// LWW stamp of this delta.
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.ts, self.by.clone())
    }

    /// Cell metadata this delta writes, for `setCell` deltas.
    pub fn cell_meta(&self) -> Option<CellMeta> {
        match &self.change {
            Change::SetCell { value, .. } => {
                Some(CellMeta::new(value.clone(), self.ts, self.by.clone()))
            }
            _ => None,
        }
    }

    /// Wire name of the edit.
    pub fn kind(&self) -> &'static str {
        self.change.kind()
    }
}
