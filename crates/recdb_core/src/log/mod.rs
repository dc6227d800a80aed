//! Append-only commit log backing both tables.
//!
//! Every change to the store is a [`LogEntry`] framed as
//!
//! ```text
//! | magic (4) | version (2) | length (4) | CBOR body (N) | crc32 (4) |
//! ```
//!
//! A table's state is the replay of its entries in log order. A scope's
//! writes land as one `Commit` frame, so a scope is either fully visible
//! after restart or not at all.
//!
//! ## Recovery
//!
//! - A frame cut short at the end of the file (crash mid-append) is
//!   discarded and the file truncated back to the last whole frame.
//! - A CRC mismatch, bad magic or unknown version anywhere is fatal: the
//!   store refuses to open rather than silently dropping data.

mod entry;
mod writer;

pub use entry::{compute_crc32, decode_frame, encode_frame, Frame, LogEntry, LogOp, LOG_MAGIC, LOG_VERSION};
pub use writer::{CommitLog, Replay};

use recdb_storage::StorageError;
use thiserror::Error;

/// Errors raised by the commit log.
#[derive(Debug, Error)]
pub enum LogError {
    /// The backing storage failed.
    #[error("log storage error: {0}")]
    Storage(#[from] StorageError),

    /// A frame failed validation.
    #[error("log corrupted at offset {offset}: {reason}")]
    Corruption {
        /// Byte offset of the frame.
        offset: u64,
        /// What failed.
        reason: String,
    },

    /// An entry could not be serialized.
    #[error("failed to encode log entry: {0}")]
    Encode(String),
}

impl LogError {
    pub(crate) fn corruption(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corruption {
            offset,
            reason: reason.into(),
        }
    }
}

/// Result alias for log operations.
pub type LogResult<T> = Result<T, LogError>;
