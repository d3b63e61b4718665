//! Append-only journal of committed transactions.
//!
//! Each frame on disk is:
//!
//! ```text
//! magic "TSJ1" (4) | payload length u32 LE (4) | JSON payload | CRC32 LE (4)
//! ```
//!
//! The CRC covers the header and the payload. Replay stops at the first
//! frame that is incomplete, has the wrong magic, fails its checksum or does
//! not decode; everything from there on is a torn tail and is cut off.

use crate::error::{StoreError, StoreResult};
use crate::outbox::OutboxEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tablesync_protocol::Table;
use tablesync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, warn};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"TSJ1";

/// magic (4) + length (4)
const HEADER_SIZE: usize = 8;

const CRC_SIZE: usize = 4;

/// One write inside a committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "w", rename_all = "camelCase")]
pub enum Write {
    /// Insert or replace a table.
    PutTable {
        /// The table.
        table: Table,
    },
    /// Remove a table.
    DeleteTable {
        /// Table id.
        id: String,
    },
    /// Insert or replace an outbox entry.
    PutOutbox {
        /// The entry.
        entry: OutboxEntry,
    },
    /// Remove an outbox entry.
    DeleteOutbox {
        /// Entry id.
        id: u64,
    },
    /// Set a meta key.
    PutMeta {
        /// Key.
        key: String,
        /// Value.
        value: Value,
    },
    /// Remove a meta key.
    DeleteMeta {
        /// Key.
        key: String,
    },
}

/// Payload of one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Frame {
    /// A committed transaction.
    Commit {
        /// Writes in the transaction.
        writes: Vec<Write>,
    },
    /// Full contents of every collection; replaces all prior state.
    Snapshot {
        /// Tables.
        tables: Vec<Table>,
        /// Outbox entries.
        outbox: Vec<OutboxEntry>,
        /// Meta keys.
        meta: BTreeMap<String, Value>,
    },
}

/// Encodes a frame with its envelope and checksum.
pub fn encode_frame(frame: &Frame) -> StoreResult<Vec<u8>> {
    let payload = serde_json::to_vec(frame)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization("journal frame too large".into()))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&FRAME_MAGIC);
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of scanning journal bytes.
#[derive(Debug)]
pub struct Replay {
    /// Intact frames in order.
    pub frames: Vec<Frame>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Whether bytes followed the intact prefix.
    pub torn: bool,
}

/// Decodes every intact frame from the start of `bytes`.
pub fn decode_frames(bytes: &[u8]) -> Replay {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        match decode_one(&bytes[offset..]) {
            Some((frame, used)) => {
                frames.push(frame);
                offset += used;
            }
            None => break,
        }
    }

    Replay {
        frames,
        valid_len: offset as u64,
        torn: offset < bytes.len(),
    }
}

fn decode_one(bytes: &[u8]) -> Option<(Frame, usize)> {
    if bytes.len() < HEADER_SIZE || bytes[..4] != FRAME_MAGIC {
        return None;
    }
    let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let body_end = HEADER_SIZE.checked_add(len)?;
    let total = body_end.checked_add(CRC_SIZE)?;
    if bytes.len() < total {
        return None;
    }

    let stored_crc = u32::from_le_bytes([
        bytes[body_end],
        bytes[body_end + 1],
        bytes[body_end + 2],
        bytes[body_end + 3],
    ]);
    if compute_crc32(&bytes[..body_end]) != stored_crc {
        return None;
    }

    let frame = serde_json::from_slice(&bytes[HEADER_SIZE..body_end]).ok()?;
    Some((frame, total))
}

/// Computes CRC32 checksum for data (IEEE polynomial).
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// The journal writer.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
    /// Set for file journals, which compact through a temporary file.
    path: Option<PathBuf>,
}

impl Journal {
    /// Opens a journal over `backend` and returns the frames to replay.
    ///
    /// A torn tail is truncated before this returns.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
        path: Option<PathBuf>,
    ) -> StoreResult<(Self, Vec<Frame>)> {
        let bytes = backend.read_all()?;
        let replay = decode_frames(&bytes);

        if replay.torn {
            warn!(
                valid_len = replay.valid_len,
                discarded = bytes.len() as u64 - replay.valid_len,
                "truncating torn journal tail"
            );
            backend.truncate(replay.valid_len)?;
        }
        debug!(frames = replay.frames.len(), "journal replayed");

        Ok((
            Self {
                backend,
                sync_on_commit,
                path,
            },
            replay.frames,
        ))
    }

    /// Appends a frame and makes it durable.
    ///
    /// On failure the journal is cut back to its previous length so later
    /// frames never follow a partial one.
    pub fn append(&mut self, frame: &Frame) -> StoreResult<()> {
        let data = encode_frame(frame)?;
        let before = self.backend.size()?;

        if let Err(err) = self.write_durably(&data) {
            if let Ok(size) = self.backend.size() {
                if size > before {
                    if let Err(cut) = self.backend.truncate(before) {
                        warn!(error = %cut, "failed to roll back partial journal frame");
                    }
                }
            }
            return Err(err);
        }
        Ok(())
    }

    fn write_durably(&mut self, data: &[u8]) -> StoreResult<()> {
        self.backend.append(data)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Current journal size in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Replaces the whole journal with a single frame.
    pub fn rewrite(&mut self, frame: &Frame) -> StoreResult<()> {
        let data = encode_frame(frame)?;

        match self.path.clone() {
            Some(path) => {
                let tmp = path.with_extension("compact");
                if tmp.exists() {
                    std::fs::remove_file(&tmp)?;
                }
                {
                    let mut fresh = FileBackend::open(&tmp)?;
                    fresh.append(&data)?;
                    fresh.flush()?;
                    fresh.sync()?;
                }
                // Close the old handle before the rename replaces its file.
                self.backend = Box::new(InMemoryBackend::new());
                std::fs::rename(&tmp, &path)?;
                self.backend = Box::new(FileBackend::open(&path)?);
            }
            None => {
                self.backend.truncate(0)?;
                self.write_durably(&data)?;
            }
        }
        Ok(())
    }
}
