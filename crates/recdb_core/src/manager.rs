//! Shared, open-once access to the store connection.

use crate::config::{Config, StoreLocation};
use crate::connection::Connection;
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

type OpenCell = Arc<OnceCell<StoreResult<Connection>>>;

/// Owns the store's single connection.
///
/// Construct one at the application's composition root and share it (for
/// example behind an `Arc`). The first [`ConnectionManager::get_connection`]
/// opens the store; every caller that arrives while that open is in flight
/// waits on the same attempt and receives the same connection. A failed open
/// is remembered too, so each caller sees the same error until
/// [`ConnectionManager::close`] resets the manager.
#[derive(Debug)]
pub struct ConnectionManager {
    config: Config,
    slot: Mutex<OpenCell>,
    open_attempts: Arc<AtomicUsize>,
}

impl ConnectionManager {
    /// Creates a manager without opening anything.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedEnvironment`] if the configured
    /// location can never hold a store, i.e. a non-directory sits at the path.
    pub fn new(config: Config) -> StoreResult<Self> {
        if let StoreLocation::Directory(path) = &config.location {
            if path.exists() && !path.is_dir() {
                return Err(StoreError::UnsupportedEnvironment {
                    reason: format!("{} exists and is not a directory", path.display()),
                });
            }
        }
        Ok(Self {
            config,
            slot: Mutex::new(Arc::new(OnceCell::new())),
            open_attempts: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Opens the connection if needed. Safe to call any number of times,
    /// from any number of tasks.
    ///
    /// # Errors
    ///
    /// Returns the open error, see [`Connection::open`].
    pub async fn init(&self) -> StoreResult<()> {
        self.get_connection().await.map(|_| ())
    }

    /// Returns the shared connection, opening it on first use.
    ///
    /// The open runs on its own task and always lands in the manager, even
    /// if every caller waiting on it is dropped first.
    ///
    /// # Errors
    ///
    /// Returns the open error, see [`Connection::open`].
    pub async fn get_connection(&self) -> StoreResult<Connection> {
        let cell = Arc::clone(&self.slot.lock());
        if let Some(opened) = cell.get() {
            return opened.clone();
        }

        let config = self.config.clone();
        let attempts = Arc::clone(&self.open_attempts);
        let opening = tokio::spawn(async move {
            cell.get_or_init(|| async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(attempt, "opening store");
                let opened = Connection::open(config).await;
                if let Err(e) = &opened {
                    tracing::warn!(error = %e, "store open failed");
                }
                opened
            })
            .await
            .clone()
        });
        opening
            .await
            .unwrap_or_else(|join| Err(StoreError::open_failed(format!("open task failed: {join}"))))
    }

    /// Returns true if a connection is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.slot.lock().get(), Some(Ok(_)))
    }

    /// Number of times the store has actually been opened.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// The configuration connections are opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Closes the connection, if any, and forgets it (or a remembered open
    /// failure). The next [`ConnectionManager::get_connection`] opens afresh.
    ///
    /// An open still in flight when this runs completes for the callers
    /// already waiting on it but is not kept.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.slot.lock(), Arc::new(OnceCell::new()));
        if let Some(Ok(conn)) = previous.get() {
            conn.close();
        }
    }
}
