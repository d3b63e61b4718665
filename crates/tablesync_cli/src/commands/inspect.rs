//! Inspect command implementation.

use super::{open_state, CliResult};
use serde::Serialize;
use std::path::Path;
use tablesync_engine::{Settings, StateStore};

/// Replica inspection result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Replica id.
    pub client_id: String,
    /// Last applied cursor.
    pub cursor: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Operations waiting for acknowledgement.
    pub pending_ops: usize,
    /// Live conflict records.
    pub conflicts: usize,
    /// Persisted settings.
    pub settings: Settings,
    /// Per-table summary.
    pub tables: Vec<TableSummary>,
}

/// Summary of one table.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    /// Table id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Number of columns.
    pub columns: usize,
    /// Number of rows.
    pub rows: usize,
    /// Local edit counter.
    pub version: u64,
}

/// Collects the inspection result for an open replica.
pub fn inspect(path: &Path, state: &StateStore) -> CliResult<InspectResult> {
    let tables = state
        .tables()
        .into_iter()
        .map(|table| TableSummary {
            columns: table.width(),
            rows: table.rows.len(),
            version: table.version,
            id: table.id,
            name: table.name,
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        client_id: state.client_id().to_string(),
        cursor: state.cursor()?.to_string(),
        journal_size: state.store().journal_size()?,
        pending_ops: state.outbox().pending_count(),
        conflicts: state.conflicts().len(),
        settings: state.settings()?,
        tables,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CliResult<()> {
    let state = open_state(path)?;
    let result = inspect(path, &state)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("tablesync replica");
    println!("=================");
    println!();
    println!("Path:      {}", result.path);
    println!("Client id: {}", result.client_id);
    println!("Cursor:    {}", result.cursor);
    println!("Journal:   {}", format_size(result.journal_size));
    println!();
    println!("Sync:");
    println!(
        "  Server URL:  {}",
        result.settings.server_url.as_deref().unwrap_or("(not set)")
    );
    println!("  Auto sync:   {}", result.settings.auto_sync);
    println!("  Pending ops: {}", result.pending_ops);
    println!("  Conflicts:   {}", result.conflicts);
    println!();
    println!("Tables ({}):", result.tables.len());
    for table in &result.tables {
        println!(
            "  [{}] {:?}: {} columns, {} rows, version {}",
            table.id, table.name, table.columns, table.rows, table.version
        );
    }
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open_state;

    #[test]
    fn summarizes_tables_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let state = open_state(dir.path()).unwrap();
        let id = state
            .create_table("People", vec!["name".into(), "age".into()])
            .unwrap();
        state.add_row(&id, None).unwrap();

        let result = inspect(dir.path(), &state).unwrap();
        assert_eq!(result.cursor, "0");
        assert_eq!(result.pending_ops, 4);
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].columns, 2);
        assert_eq!(result.tables[0].rows, 1);
        assert!(result.journal_size > 0);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["pendingOps"], 4);
        assert_eq!(json["settings"]["autoSync"], true);
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_state(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(10), "10 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
