//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK        # Advisory lock, one open handle at a time
//! └─ recdb.log   # Commit log
//! ```

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "recdb.log";

/// Errors raised while opening a store directory.
#[derive(Debug, Error)]
pub enum DirError {
    /// The directory is absent and creation was not requested.
    #[error("store directory does not exist: {}", .0.display())]
    Missing(PathBuf),

    /// Something other than a directory sits at the path.
    #[error("path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Another handle holds the lock.
    #[error("store at {} is locked by another handle", .0.display())]
    Locked(PathBuf),

    /// I/O failure.
    #[error("store directory I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An opened store directory holding the exclusive lock.
///
/// The lock is released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens (or creates) the directory and takes the lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`DirError::Locked`] if another handle holds the lock, or
    /// another [`DirError`] if the directory cannot be used.
    pub fn open(path: &Path, create_if_missing: bool) -> Result<Self, DirError> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(DirError::Missing(path.to_path_buf()));
            }
        }
        if !path.is_dir() {
            return Err(DirError::NotADirectory(path.to_path_buf()));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(DirError::Locked(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// The directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the commit log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }
}
