//! CLI command implementations.

pub mod compact;
pub mod dump_outbox;
pub mod inspect;
pub mod reset;
pub mod settings;
pub mod sync;

use std::path::Path;
use std::sync::Arc;
use tablesync_engine::{DurableStore, StateStore, StoreConfig, SyncConfig, SystemClock};

/// Result type shared by the commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Opens the replica stored at `path`.
pub fn open_state(path: &Path) -> CliResult<StateStore> {
    if !path.is_dir() {
        return Err(format!("no store found at {}", path.display()).into());
    }
    let store = Arc::new(DurableStore::open(path, StoreConfig::default())?);
    Ok(StateStore::open(store, Arc::new(SystemClock), &SyncConfig::default())?)
}
