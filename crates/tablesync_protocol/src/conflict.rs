//! Cell conflict records.

use serde::{Deserialize, Serialize};

/// Identifies a cell across tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictKey {
    /// Table id.
    pub table_id: String,
    /// Row id.
    pub row_id: String,
    /// Column index.
    pub col: usize,
}

impl ConflictKey {
    /// Creates a key.
    pub fn new(table_id: impl Into<String>, row_id: impl Into<String>, col: usize) -> Self {
        Self {
            table_id: table_id.into(),
            row_id: row_id.into(),
            col,
        }
    }
}

/// A remote write that lost to the local value.
///
/// Both values stay visible so the cell can be flagged; the cell itself
/// remains editable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellConflict {
    /// Conflicted cell.
    #[serde(flatten)]
    pub key: ConflictKey,
    /// Value kept.
    pub local_value: String,
    /// Value rejected.
    pub remote_value: String,
    /// Detection time, milliseconds since the Unix epoch.
    pub detected_at: u64,
}

impl CellConflict {
    /// Creates a conflict record.
    pub fn new(
        key: ConflictKey,
        local_value: impl Into<String>,
        remote_value: impl Into<String>,
        detected_at: u64,
    ) -> Self {
        Self {
            key,
            local_value: local_value.into(),
            remote_value: remote_value.into(),
            detected_at,
        }
    }

    /// Returns true once the record is older than `window_ms` at `now_ms`.
    pub fn is_expired(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.detected_at) >= window_ms
    }
}
