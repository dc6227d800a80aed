//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A storage backend over a single file, normally a store's `recdb.log`.
///
/// The commit log drives it in three ways. Each commit is one `append` of
/// whole frames followed by `flush()` (bytes handed to the OS) or, with
/// sync-on-commit, `sync()` (`File::sync_all()`). Opening a store reads the
/// file back from offset 0 with `read_at`. `truncate` cuts a torn final
/// frame after a crash, or the bytes of an append whose flush or sync
/// failed.
///
/// The cached size is the append position, so appends never need a
/// metadata round-trip. A failed `write_all` leaves the cached size where
/// it was, which makes `truncate(size)` the right rollback even when part
/// of the data reached the file.
///
/// # Example
///
/// ```no_run
/// use recdb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("recdb.log")).unwrap();
/// backend.append(b"entry").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileBackend {
    /// Opens or creates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        // Seeking mutates the cursor, so reads take the write side too.
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();
        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();
        if new_size > *size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn new_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recdb.log");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert_eq!(backend.path(), path);
        assert!(path.exists());
    }

    #[test]
    fn append_then_read_range() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("recdb.log")).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
        assert!(matches!(
            backend.read_at(10, 5),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recdb.log");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 10);
        assert_eq!(backend.read_at(0, 10).unwrap(), b"persistent");
    }

    #[test]
    fn truncate_then_append_reuses_offset() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("recdb.log")).unwrap();
        backend.append(b"keep|drop").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.append(b"next").unwrap(), 5);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"keep|next");
        assert!(backend.truncate(100).is_err());
    }

    #[test]
    fn truncate_to_append_offset_undoes_the_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recdb.log");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"frame-1").unwrap();

        let offset = backend.append(b"frame-2").unwrap();
        backend.truncate(offset).unwrap();
        drop(backend);

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 7);
        assert_eq!(backend.read_at(0, 7).unwrap(), b"frame-1");
    }

    #[test]
    fn empty_append_returns_end_offset() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("recdb.log")).unwrap();
        backend.append(b"x").unwrap();

        assert_eq!(backend.append(b"").unwrap(), 1);
        assert!(backend.flush().is_ok());
    }
}
