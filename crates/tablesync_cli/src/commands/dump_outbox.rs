//! Dump-outbox command implementation.

use super::{open_state, CliResult};
use std::path::Path;
use tablesync_engine::OutboxEntry;
use tablesync_protocol::Change;

/// Runs the dump-outbox command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> CliResult<()> {
    let state = open_state(path)?;
    let entries = state.outbox().pending_batch(limit.unwrap_or(usize::MAX));

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            println!("Pending operations: {}", state.outbox().pending_count());
            for entry in &entries {
                println!("{}", describe(entry));
            }
        }
    }
    Ok(())
}

/// One-line description of a queued operation.
pub fn describe(entry: &OutboxEntry) -> String {
    let op = &entry.op;
    let detail = match &op.change {
        Change::SetCell { row_id, col, value } => format!("row={row_id} col={col} value={value:?}"),
        Change::AddRow {
            row_id,
            after_row_id,
        } => match after_row_id {
            Some(after) => format!("row={row_id} after={after}"),
            None => format!("row={row_id}"),
        },
        Change::DeleteRow { row_id } => format!("row={row_id}"),
        Change::AddColumn { col_index, header } => format!("col={col_index} header={header:?}"),
        Change::DeleteColumn { col_index } => format!("col={col_index}"),
        Change::SetHeader { col_index, header } => format!("col={col_index} header={header:?}"),
        Change::RenameTable { name } => format!("name={name:?}"),
        Change::DeleteTable => String::new(),
    };
    format!(
        "#{:<6} ts={:<14} {:<13} table={} {}",
        entry.id,
        op.ts.unwrap_or_default(),
        op.kind(),
        op.table_id,
        detail
    )
    .trim_end()
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablesync_protocol::Operation;

    #[test]
    fn describes_cell_writes() {
        let entry = OutboxEntry {
            id: 7,
            op: Operation::new(
                "T",
                Change::SetCell {
                    row_id: "r".into(),
                    col: 2,
                    value: "x".into(),
                },
            )
            .stamped(42, "c"),
            synced: false,
            enqueued_at: 42,
        };
        let line = describe(&entry);
        assert!(line.starts_with("#7"));
        assert!(line.contains("setCell"));
        assert!(line.ends_with("row=r col=2 value=\"x\""));
    }

    #[test]
    fn delete_table_has_no_detail() {
        let entry = OutboxEntry {
            id: 1,
            op: Operation::new("T", Change::DeleteTable).stamped(1, "c"),
            synced: false,
            enqueued_at: 1,
        };
        assert!(describe(&entry).ends_with("table=T"));
    }
}
