//! Typed change notifications.
//!
//! Events are published only after the write they describe is durable.
//! Each subscriber gets its own unbounded channel; dropped receivers are
//! pruned on the next publish.

use crate::config::Settings;
use crate::engine::SyncStatus;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A state change visible to UI collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StateEvent {
    /// Tables were loaded from the durable store.
    #[serde(rename_all = "camelCase")]
    Init {
        /// Loaded tables.
        table_ids: Vec<String>,
    },
    /// A table was created locally.
    #[serde(rename_all = "camelCase")]
    TableCreated {
        /// New table.
        table_id: String,
    },
    /// Remote deltas changed these tables. Tables deleted by the batch are
    /// included and are absent from the store.
    #[serde(rename_all = "camelCase")]
    TableUpdated {
        /// Touched tables.
        table_ids: Vec<String>,
    },
    /// A cell was written locally.
    #[serde(rename_all = "camelCase")]
    CellUpdated {
        /// Table.
        table_id: String,
        /// Row.
        row_id: String,
        /// Column.
        col: usize,
    },
    /// A row was inserted locally.
    #[serde(rename_all = "camelCase")]
    RowAdded {
        /// Table.
        table_id: String,
        /// New row.
        row_id: String,
    },
    /// A row was removed locally.
    #[serde(rename_all = "camelCase")]
    RowDeleted {
        /// Table.
        table_id: String,
        /// Removed row.
        row_id: String,
    },
    /// A column was inserted locally.
    #[serde(rename_all = "camelCase")]
    ColumnAdded {
        /// Table.
        table_id: String,
        /// Position of the new column.
        col_index: usize,
    },
    /// A column was removed locally.
    #[serde(rename_all = "camelCase")]
    ColumnDeleted {
        /// Table.
        table_id: String,
        /// Position of the removed column.
        col_index: usize,
    },
    /// A column header changed locally.
    #[serde(rename_all = "camelCase")]
    HeaderUpdated {
        /// Table.
        table_id: String,
        /// Column whose header changed.
        col_index: usize,
    },
    /// A table was removed locally.
    #[serde(rename_all = "camelCase")]
    TableDeleted {
        /// Removed table.
        table_id: String,
    },
    /// Tables were imported.
    #[serde(rename_all = "camelCase")]
    DataImported {
        /// Imported tables.
        table_ids: Vec<String>,
    },
    /// All local data was reset.
    DataCleared,
    /// The sync status changed.
    SyncStatusChanged {
        /// New status.
        status: SyncStatus,
    },
    /// Settings were changed.
    SettingsUpdated {
        /// New settings.
        settings: Settings,
    },
}

impl StateEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::Init { .. } => "init",
            StateEvent::TableCreated { .. } => "tableCreated",
            StateEvent::TableUpdated { .. } => "tableUpdated",
            StateEvent::CellUpdated { .. } => "cellUpdated",
            StateEvent::RowAdded { .. } => "rowAdded",
            StateEvent::RowDeleted { .. } => "rowDeleted",
            StateEvent::ColumnAdded { .. } => "columnAdded",
            StateEvent::ColumnDeleted { .. } => "columnDeleted",
            StateEvent::HeaderUpdated { .. } => "headerUpdated",
            StateEvent::TableDeleted { .. } => "tableDeleted",
            StateEvent::DataImported { .. } => "dataImported",
            StateEvent::DataCleared => "dataCleared",
            StateEvent::SyncStatusChanged { .. } => "syncStatusChanged",
            StateEvent::SettingsUpdated { .. } => "settingsUpdated",
        }
    }
}

/// Fan-out of [`StateEvent`]s to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<UnboundedSender<StateEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. Events published from now on are delivered
    /// to the returned receiver in publish order.
    pub fn subscribe(&self) -> UnboundedReceiver<StateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Registers a subscriber whose first event is `initial`.
    pub fn subscribe_with(&self, initial: StateEvent) -> UnboundedReceiver<StateEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock();
        if tx.send(initial).is_ok() {
            subscribers.push(tx);
        }
        rx
    }

    /// Delivers `event` to every live subscriber.
    pub fn publish(&self, event: StateEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_every_subscriber_in_order() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(StateEvent::DataCleared);
        bus.publish(StateEvent::TableDeleted {
            table_id: "T".into(),
        });

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.try_recv().unwrap(), StateEvent::DataCleared);
            assert_eq!(rx.try_recv().unwrap().name(), "tableDeleted");
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(StateEvent::DataCleared);
        assert_eq!(bus.subscriber_count(), 1);
        drop(keep);
    }

    #[test]
    fn payload_names_match_wire_contract() {
        let event = StateEvent::CellUpdated {
            table_id: "T".into(),
            row_id: "r".into(),
            col: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "cellUpdated");
        assert_eq!(json["tableId"], "T");
        assert_eq!(json["rowId"], "r");
        assert_eq!(event.name(), "cellUpdated");
    }
}
