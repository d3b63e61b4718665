//! # tablesync server
//!
//! Reference sync authority for tablesync replicas.
//!
//! This crate provides:
//! - An ordered change log whose positions are issued as cursors
//! - Server tables maintained with the same per-cell last-writer-wins rule
//!   the replicas use
//! - Push and pull handlers, plus a small HTTP router for loopback and
//!   embedding
//!
//! # Protocol
//!
//! - `POST /sync` with a [`PushRequest`](tablesync_protocol::PushRequest):
//!   the batch is applied in order and the response carries the operations
//!   other clients wrote since the request's base cursor
//! - `GET /sync?since=<cursor>`: a pull from the origin receives a table
//!   snapshot; later pulls receive deltas in log order
//!
//! An operation is recorded only when it changes the server tables. Stale
//! cell writes, replays and edits aimed at missing rows or tables are
//! dropped.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod oplog;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use oplog::{cursor_for, parse_cursor, AppendOutcome, LogEntry, ServerOplog};
pub use server::SyncServer;
