//! Settings command implementation.

use super::{open_state, CliResult};
use std::path::Path;
use tablesync_engine::{Settings, StateStore};

/// Requested settings changes.
#[derive(Debug, Default, Clone)]
pub struct SettingsUpdate {
    /// New server URL; an empty string clears it.
    pub server_url: Option<String>,
    /// New auto-sync flag.
    pub auto_sync: Option<bool>,
}

impl SettingsUpdate {
    /// Returns true if nothing would change.
    pub fn is_empty(&self) -> bool {
        self.server_url.is_none() && self.auto_sync.is_none()
    }
}

/// Applies `update` and returns the resulting settings.
pub fn apply(state: &StateStore, update: SettingsUpdate) -> CliResult<Settings> {
    let mut settings = state.settings()?;
    if update.is_empty() {
        return Ok(settings);
    }
    if let Some(url) = update.server_url {
        settings.server_url = if url.is_empty() { None } else { Some(url) };
    }
    if let Some(auto_sync) = update.auto_sync {
        settings.auto_sync = auto_sync;
    }
    state.update_settings(settings.clone())?;
    Ok(settings)
}

/// Runs the settings command.
pub fn run(path: &Path, update: SettingsUpdate) -> CliResult<()> {
    let state = open_state(path)?;
    let settings = apply(&state, update)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let state = open_state(dir.path()).unwrap();
            let settings = apply(
                &state,
                SettingsUpdate {
                    server_url: Some("http://example.test/api".into()),
                    auto_sync: Some(false),
                },
            )
            .unwrap();
            assert!(!settings.auto_sync);
        }

        let state = open_state(dir.path()).unwrap();
        let settings = apply(&state, SettingsUpdate::default()).unwrap();
        assert_eq!(settings.server_url.as_deref(), Some("http://example.test/api"));
        assert!(!settings.auto_sync);

        let cleared = apply(
            &state,
            SettingsUpdate {
                server_url: Some(String::new()),
                auto_sync: None,
            },
        )
        .unwrap();
        assert!(cleared.server_url.is_none());
    }
}
