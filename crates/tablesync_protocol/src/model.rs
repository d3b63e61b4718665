//! Table data model.

use crate::error::{ProtocolError, ProtocolResult};
use crate::stamp::Stamp;
use serde::{Deserialize, Serialize};

/// Provenance of the last accepted write to a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMeta {
    /// Value that was written.
    pub value: String,
    /// Writer's timestamp in milliseconds since the Unix epoch.
    pub ts: u64,
    /// Writer's client id.
    pub by: String,
}

impl CellMeta {
    /// Creates cell metadata for a write.
    pub fn new(value: impl Into<String>, ts: u64, by: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ts,
            by: by.into(),
        }
    }

    /// Returns the LWW stamp of this write.
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.ts, self.by.clone())
    }
}

/// A table row.
///
/// `cells` and `cell_meta` are parallel: entry `i` of `cell_meta` describes
/// the last accepted write to `cells[i]`, or is `None` if the cell was never
/// written through a stamped edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Opaque unique row id.
    pub row_id: String,
    /// Cell values, one per header.
    pub cells: Vec<String>,
    /// Per-cell write metadata, parallel to `cells`.
    #[serde(default)]
    pub cell_meta: Vec<Option<CellMeta>>,
}

impl Row {
    /// Creates a row of `width` empty cells.
    pub fn empty(row_id: impl Into<String>, width: usize) -> Self {
        Self {
            row_id: row_id.into(),
            cells: vec![String::new(); width],
            cell_meta: vec![None; width],
        }
    }

    /// Pads or cuts the row to exactly `width` cells and metadata slots.
    pub fn normalize(&mut self, width: usize) {
        self.cells.resize(width, String::new());
        self.cell_meta.resize(width, None);
    }

    /// Returns the stamp of the last accepted write to `col`.
    pub fn stamp_at(&self, col: usize) -> Option<Stamp> {
        self.cell_meta
            .get(col)
            .and_then(|meta| meta.as_ref())
            .map(CellMeta::stamp)
    }
}

/// A table: named headers plus ordered rows.
///
/// Every structural primitive here keeps `row.cells.len() == headers.len()`
/// for every row once it returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    /// Opaque unique table id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Column headers.
    pub headers: Vec<String>,
    /// Rows in display order.
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Last modification, milliseconds since the Unix epoch.
    #[serde(default)]
    pub updated_at: u64,
    /// Local edit counter.
    #[serde(default)]
    pub version: u64,
}

impl Table {
    /// Creates an empty table.
    pub fn new(id: impl Into<String>, name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            headers,
            rows: Vec::new(),
            updated_at: 0,
            version: 0,
        }
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Records a modification.
    pub fn touch(&mut self, now_ms: u64) {
        self.version += 1;
        self.updated_at = now_ms;
    }

    /// Position of a row.
    pub fn row_index(&self, row_id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.row_id == row_id)
    }

    /// Looks up a row.
    pub fn row(&self, row_id: &str) -> Option<&Row> {
        self.rows.iter().find(|row| row.row_id == row_id)
    }

    /// Returns the value of a cell, if the row and column exist.
    pub fn cell(&self, row_id: &str, col: usize) -> Option<&str> {
        self.row(row_id)
            .and_then(|row| row.cells.get(col))
            .map(String::as_str)
    }

    /// Inserts an empty row after `after_row_id`, or appends it when that
    /// row is absent or not given.
    ///
    /// Returns false without changing anything if `row_id` already exists.
    pub fn insert_row(&mut self, row_id: &str, after_row_id: Option<&str>) -> bool {
        if self.row_index(row_id).is_some() {
            return false;
        }
        let row = Row::empty(row_id, self.width());
        match after_row_id.and_then(|after| self.row_index(after)) {
            Some(idx) => self.rows.insert(idx + 1, row),
            None => self.rows.push(row),
        }
        true
    }

    /// Removes a row. Returns false if it was not present.
    pub fn remove_row(&mut self, row_id: &str) -> bool {
        match self.row_index(row_id) {
            Some(idx) => {
                self.rows.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Inserts a column at `col_index`, or appends it when the index is past
    /// the end. Every row gains an empty cell at the same position.
    ///
    /// Returns the index the column landed at.
    pub fn insert_column(&mut self, col_index: usize, header: impl Into<String>) -> usize {
        let idx = col_index.min(self.headers.len());
        self.headers.insert(idx, header.into());
        for row in &mut self.rows {
            let at = idx.min(row.cells.len());
            row.cells.insert(at, String::new());
            let at = idx.min(row.cell_meta.len());
            row.cell_meta.insert(at, None);
        }
        idx
    }

    /// Removes the header and every row's cell at `col_index`.
    pub fn remove_column(&mut self, col_index: usize) -> ProtocolResult<()> {
        self.check_column(col_index)?;
        self.headers.remove(col_index);
        for row in &mut self.rows {
            if col_index < row.cells.len() {
                row.cells.remove(col_index);
            }
            if col_index < row.cell_meta.len() {
                row.cell_meta.remove(col_index);
            }
        }
        Ok(())
    }

    /// Overwrites a header.
    pub fn set_header(&mut self, col_index: usize, header: impl Into<String>) -> ProtocolResult<()> {
        self.check_column(col_index)?;
        self.headers[col_index] = header.into();
        Ok(())
    }

    /// Stamp of the last accepted write to a cell.
    pub fn cell_stamp(&self, row_id: &str, col: usize) -> Option<Stamp> {
        self.row(row_id).and_then(|row| row.stamp_at(col))
    }

    /// Writes a cell unconditionally, recording its metadata.
    ///
    /// Callers decide beforehand whether the write should win.
    pub fn write_cell(&mut self, row_id: &str, col: usize, meta: CellMeta) -> ProtocolResult<()> {
        self.check_column(col)?;
        let width = self.width();
        let idx = self.row_index(row_id).ok_or_else(|| ProtocolError::RowNotFound {
            table_id: self.id.clone(),
            row_id: row_id.to_string(),
        })?;
        let row = &mut self.rows[idx];
        row.normalize(width);
        row.cells[col] = meta.value.clone();
        row.cell_meta[col] = Some(meta);
        Ok(())
    }

    /// Fails if `col` is not a valid column.
    pub fn check_column(&self, col: usize) -> ProtocolResult<()> {
        if col < self.width() {
            Ok(())
        } else {
            Err(ProtocolError::ColumnOutOfRange {
                col,
                width: self.width(),
            })
        }
    }

    /// Fails on the first row whose cell count differs from the header count.
    pub fn check_shape(&self) -> ProtocolResult<()> {
        let headers = self.width();
        match self.rows.iter().find(|row| row.cells.len() != headers) {
            Some(row) => Err(ProtocolError::RowWidthMismatch {
                row_id: row.row_id.clone(),
                cells: row.cells.len(),
                headers,
            }),
            None => Ok(()),
        }
    }

    /// Pads or cuts every row to the header count and aligns metadata.
    pub fn normalize(&mut self) {
        let width = self.width();
        for row in &mut self.rows {
            row.normalize(width);
        }
    }
}
