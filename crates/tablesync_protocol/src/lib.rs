//! # tablesync protocol
//!
//! Table model, operations and JSON wire messages shared by tablesync
//! replicas and the remote authority.
//!
//! This crate provides:
//! - [`Table`], [`Row`] and [`CellMeta`], with the structural primitives
//!   that keep every row as wide as the header list
//! - [`Change`], a closed tagged union of the eight edit kinds, wrapped by
//!   [`Operation`] (outbound) and [`Delta`] (inbound)
//! - [`Stamp`], the `(timestamp, client id)` order used for per-cell
//!   last-writer-wins
//! - [`Cursor`], the authority's opaque position token
//! - [`PushRequest`], [`PushResponse`] and [`PullResponse`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod cursor;
mod error;
mod messages;
mod model;
mod operation;
mod stamp;

pub use conflict::{CellConflict, ConflictKey};
pub use cursor::Cursor;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{JsonCodec, PullResponse, PushRequest, PushResponse};
pub use model::{CellMeta, Row, Table};
pub use operation::{Change, Delta, Operation};
pub use stamp::{LwwDecision, Stamp};
