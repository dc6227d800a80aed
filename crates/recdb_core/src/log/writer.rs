//! Commit log writer and replay.

use super::entry::{decode_frame, encode_frame, Frame, LogEntry};
use super::LogResult;
use recdb_storage::{StorageBackend, StorageResult};

/// The entries read back from a log, in order.
#[derive(Debug, Default)]
pub struct Replay {
    /// Every whole entry.
    pub entries: Vec<LogEntry>,
    /// Bytes of an incomplete final frame that were dropped.
    pub torn_bytes: u64,
}

/// Append-only log of [`LogEntry`] frames over a storage backend.
///
/// Callers serialize access; the connection keeps the log behind a mutex and
/// only touches it from blocking tasks.
pub struct CommitLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl CommitLog {
    /// Wraps a backend. With `sync_on_commit`, every append is fsynced
    /// before it returns.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// Appends entries as one contiguous write.
    ///
    /// Either every frame reaches the backend or, on a crash mid-write, the
    /// trailing partial frame is discarded by the next [`CommitLog::replay`].
    /// If the write or the following flush/sync fails, the log is truncated
    /// back to where it stood, so a failed append never replays later.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append_all(&mut self, entries: &[LogEntry]) -> LogResult<u64> {
        let mut data = Vec::new();
        for entry in entries {
            data.extend_from_slice(&encode_frame(entry)?);
        }
        let start = self.backend.size()?;
        match self.write_durably(&data) {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if let Err(undo) = self.backend.truncate(start) {
                    tracing::error!(offset = start, error = %undo, "failed to roll back log append");
                }
                Err(e.into())
            }
        }
    }

    fn write_durably(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = self.backend.append(data)?;
        if self.sync_on_commit {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }
        Ok(offset)
    }

    /// Appends a single entry.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append(&mut self, entry: &LogEntry) -> LogResult<u64> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Current log size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> LogResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Reads every entry and drops an incomplete final frame.
    ///
    /// # Errors
    ///
    /// Returns [`super::LogError::Corruption`] if any whole frame fails
    /// validation, or a storage error.
    pub fn replay(&mut self) -> LogResult<Replay> {
        let size = self.backend.size()?;
        let buf = self.backend.read_at(0, size as usize)?;

        let mut replay = Replay::default();
        let mut pos = 0usize;
        while pos < buf.len() {
            match decode_frame(&buf[pos..], pos as u64)? {
                Frame::Entry(entry, len) => {
                    replay.entries.push(entry);
                    pos += len;
                }
                Frame::Torn => break,
            }
        }

        if pos < buf.len() {
            replay.torn_bytes = (buf.len() - pos) as u64;
            tracing::warn!(
                offset = pos,
                dropped = replay.torn_bytes,
                "discarding incomplete log tail"
            );
            self.backend.truncate(pos as u64)?;
            self.backend.sync()?;
        }
        Ok(replay)
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}
