//! Sync command implementation.

use super::{open_state, CliResult};
use std::path::Path;

/// Runs one sync cycle against the configured server.
///
/// `server_url` overrides the persisted setting for this run only.
pub fn run(path: &Path, server_url: Option<String>) -> CliResult<()> {
    let state = open_state(path)?;
    let url = match server_url {
        Some(url) => url,
        None => state
            .settings()?
            .server_url
            .ok_or("no server URL configured; pass --server-url or run `settings --server-url`")?,
    };
    imp::sync(state, &url)
}

#[cfg(feature = "http")]
mod imp {
    use super::CliResult;
    use std::sync::Arc;
    use std::time::Duration;
    use tablesync_engine::{HttpTransport, ReqwestClient, StateStore, SyncConfig, SyncEngine};

    pub fn sync(state: StateStore, url: &str) -> CliResult<()> {
        let client = ReqwestClient::new(Duration::from_secs(30))?;
        let transport = HttpTransport::new(url, client);
        let engine = SyncEngine::new(Arc::new(state), transport, SyncConfig::default());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let outcome = runtime.block_on(engine.sync_with_retry())?;

        if let Some(result) = outcome.result() {
            println!("Pushed:    {} operations", result.pushed);
            println!("Received:  {} deltas ({} applied)", result.received, result.applied);
            println!("Conflicts: {}", result.conflicts.len());
            println!("Cursor:    {}", result.cursor);
            println!("Took:      {:?}", result.duration);
        }
        Ok(())
    }
}

#[cfg(not(feature = "http"))]
mod imp {
    use super::CliResult;
    use tablesync_engine::StateStore;

    pub fn sync(_state: StateStore, url: &str) -> CliResult<()> {
        Err(format!("cannot reach {url}: built without the `http` feature").into())
    }
}
