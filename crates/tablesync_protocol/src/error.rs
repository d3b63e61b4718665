//! Error types for model validation and wire decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by the table model or the JSON codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Column index outside the table's headers.
    #[error("column {col} out of range for table with {width} columns")]
    ColumnOutOfRange {
        /// Requested column.
        col: usize,
        /// Number of headers.
        width: usize,
    },

    /// Row id not present in the table.
    #[error("row {row_id} not found in table {table_id}")]
    RowNotFound {
        /// Table searched.
        table_id: String,
        /// Missing row.
        row_id: String,
    },

    /// Row id already present in the table.
    #[error("row {row_id} already exists in table {table_id}")]
    DuplicateRow {
        /// Table searched.
        table_id: String,
        /// Duplicate row.
        row_id: String,
    },

    /// Table id unknown.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A row whose cell count differs from the header count.
    #[error("row {row_id} has {cells} cells but table has {headers} headers")]
    RowWidthMismatch {
        /// Offending row.
        row_id: String,
        /// Cells in the row.
        cells: usize,
        /// Headers in the table.
        headers: usize,
    },

    /// Operation rejected before anything was mutated.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Codec(err.to_string())
    }
}
