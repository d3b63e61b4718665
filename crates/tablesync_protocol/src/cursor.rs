//! Authority-issued stream positions.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// An opaque, totally ordered position in the authority's change stream.
///
/// Replicas never parse a cursor. They store it, send it back, and compare
/// two cursors to tell whether a delta lies after the position already
/// applied. Comparison is by length and then bytewise, which orders the
/// authority's decimal counters numerically; `"0"` is the origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// The origin cursor, which precedes every delta.
    pub const ORIGIN: &'static str = "0";

    /// Wraps a token issued by the authority.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the origin cursor.
    pub fn origin() -> Self {
        Self(Self::ORIGIN.to_string())
    }

    /// Returns true for the origin cursor.
    pub fn is_origin(&self) -> bool {
        self.0 == Self::ORIGIN
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::origin()
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.as_bytes().cmp(other.0.as_bytes()))
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
