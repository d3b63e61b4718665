//! Short-lived record of remote writes that lost to local values.

use crate::clock::Clock;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tablesync_protocol::{CellConflict, ConflictKey};

/// Tracks cell conflicts for a fixed window.
///
/// Entries expire on their own once the window has passed, whether or not
/// anything read them. Every access prunes expired entries first.
#[derive(Debug)]
pub struct ConflictTracker {
    window_ms: u64,
    clock: Arc<dyn Clock>,
    entries: Mutex<BTreeMap<ConflictKey, CellConflict>>,
}

impl ConflictTracker {
    /// Creates a tracker that keeps conflicts for `window`.
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            clock,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records a conflict, replacing an earlier one for the same cell.
    pub fn record(&self, conflict: CellConflict) {
        let mut entries = self.entries.lock();
        self.prune(&mut entries);
        entries.insert(conflict.key.clone(), conflict);
    }

    /// Returns the live conflict for a cell.
    pub fn get(&self, key: &ConflictKey) -> Option<CellConflict> {
        let mut entries = self.entries.lock();
        self.prune(&mut entries);
        entries.get(key).cloned()
    }

    /// Returns true if the cell has a live conflict.
    pub fn is_conflicted(&self, table_id: &str, row_id: &str, col: usize) -> bool {
        self.get(&ConflictKey::new(table_id, row_id, col)).is_some()
    }

    /// Live conflicts ordered by cell.
    pub fn active(&self) -> Vec<CellConflict> {
        let mut entries = self.entries.lock();
        self.prune(&mut entries);
        entries.values().cloned().collect()
    }

    /// Number of live conflicts.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.prune(&mut entries);
        entries.len()
    }

    /// Returns true if no conflict is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every conflict.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Current wall-clock time as seen by the tracker.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn prune(&self, entries: &mut BTreeMap<ConflictKey, CellConflict>) {
        let now = self.clock.now_ms();
        entries.retain(|_, c| !c.is_expired(now, self.window_ms));
    }
}
