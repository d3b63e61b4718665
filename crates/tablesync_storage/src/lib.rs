//! # tablesync storage
//!
//! Byte-store backends underneath the tablesync durable journal.
//!
//! Backends are **opaque byte stores**: they append, read back and truncate
//! bytes. Framing, checksums and the meaning of the records belong to the
//! journal in `tablesync_engine`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - for tests; handles can share one buffer so a test
//!   can "restart" a store, and appends can be made to fail on demand
//! - [`FileBackend`] - persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use tablesync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
