//! # tablesync engine
//!
//! Offline-first replica of a set of tables, synchronized with a remote
//! authority.
//!
//! This crate provides:
//! - [`DurableStore`]: transactional persistence for tables, the outbox and
//!   meta keys over a crash-safe journal
//! - [`Outbox`]: the durable queue of local operations awaiting
//!   acknowledgement
//! - [`StateStore`]: the single mutation path for tables, publishing
//!   [`StateEvent`]s after every durable write
//! - [`Reconciler`]: per-cell last-writer-wins merge of remote deltas with
//!   idempotent structural edits
//! - [`SyncEngine`]: push/pull cycles with cursor discipline, retry with
//!   exponential backoff, and a background worker
//! - [`SyncTransport`] implementations: [`MockTransport`], and
//!   [`HttpTransport`] over any [`HttpClient`]
//!
//! ## Key Invariants
//!
//! - An operation is durable before the flush path can see it
//! - Operations stay pending until acknowledged or explicitly cleared
//! - The cursor is persisted in the same commit as the deltas it covers
//! - Applying a delta twice changes nothing the second time
//! - Every row is as wide as its table's header list
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tablesync_engine::{DurableStore, StateStore, SyncConfig, SystemClock};
//!
//! let store = Arc::new(DurableStore::in_memory().unwrap());
//! let state = StateStore::open(store, Arc::new(SystemClock), &SyncConfig::default()).unwrap();
//!
//! let table = state.create_table("People", vec!["name".into()]).unwrap();
//! let row = state.add_row(&table, None).unwrap();
//! state.set_cell(&table, &row, 0, "Ada").unwrap();
//!
//! assert_eq!(state.table(&table).unwrap().cell(&row, 0), Some("Ada"));
//! assert_eq!(state.outbox().pending_count(), 4);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod conflict;
mod engine;
mod error;
mod events;
mod http;
mod outbox;
mod reconciler;
mod scheduler;
mod state;
mod store;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetryConfig, Settings, StoreConfig, SyncConfig};
pub use conflict::ConflictTracker;
pub use engine::{SyncCycleResult, SyncEngine, SyncOutcome, SyncStats, SyncStatus, SyncWorker};
pub use error::{StoreError, StoreResult, SyncError, SyncResult};
pub use events::{EventBus, StateEvent};
#[cfg(feature = "reqwest")]
pub use http::ReqwestClient;
pub use http::{HttpClient, HttpError, HttpTransport, LoopbackClient, LoopbackServer};
pub use outbox::{Outbox, OutboxEntry};
pub use reconciler::{ApplyReport, DeltaOutcome, Reconciler, SkipReason, WorkingSet};
pub use scheduler::ScheduledTask;
pub use state::{RemoteBatch, StateStore};
pub use store::{meta_keys, Collections, DurableStore, StoreDir, Txn};
pub use transport::{MockTransport, SyncTransport, TransportCall};
