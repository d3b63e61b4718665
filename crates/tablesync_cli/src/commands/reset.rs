//! Reset command implementation.

use super::{open_state, CliResult};
use std::path::Path;

/// Runs the reset command: drops tables, the cursor and pending operations.
pub fn run(path: &Path, yes: bool) -> CliResult<()> {
    let state = open_state(path)?;
    let pending = state.outbox().pending_count();
    if pending > 0 && !yes {
        return Err(format!(
            "{pending} operations have not been synced; pass --yes to discard them"
        )
        .into());
    }

    let tables = state.tables().len();
    state.clear_all()?;
    println!("Cleared {tables} tables and {pending} pending operations");
    Ok(())
}
