//! Compact command implementation.

use super::inspect::format_size;
use super::{open_state, CliResult};
use std::path::Path;

/// Runs the compact command: rewrites the journal as a single snapshot.
pub fn run(path: &Path) -> CliResult<()> {
    let state = open_state(path)?;
    let store = state.store();

    let before = store.journal_size()?;
    store.compact()?;
    let after = store.journal_size()?;

    println!("Journal size before: {}", format_size(before));
    println!("Journal size after:  {}", format_size(after));
    if before > after {
        println!("Reclaimed {}", format_size(before - after));
    }
    Ok(())
}
