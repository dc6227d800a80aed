//! The live connection to a store.

use crate::config::{Config, StoreLocation};
use crate::dir::{DirError, StoreDir};
use crate::error::{StoreError, StoreResult};
use crate::log::CommitLog;
use crate::request::{Request, RequestKind};
use crate::schema::{store_schema, Catalog};
use crate::scope::Scope;
use crate::table::Table;
use crate::types::{Mode, TableName};
use parking_lot::Mutex;
use recdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An open store: both tables, the commit log and the directory lock.
///
/// Cloning is cheap and every clone refers to the same connection.
/// Connections are handed out by [`crate::ConnectionManager`]; callers only
/// ever reach the data through [`Connection::scope`].
#[derive(Clone, Debug)]
pub struct Connection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    id: Uuid,
    schema_version: u32,
    tree: Arc<RwLock<Table>>,
    data: Arc<RwLock<Table>>,
    log: Arc<Mutex<CommitLog>>,
    dir: Mutex<Option<StoreDir>>,
    closed: AtomicBool,
}

impl Connection {
    /// Opens the store described by `config`, creating or upgrading the
    /// schema as needed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::OpenBlocked`] if another handle holds the store
    /// - [`StoreError::OpenFailed`] if the log is unreadable or was written
    ///   by a newer schema version
    /// - [`StoreError::SchemaCreateFailed`] if table creation fails for a
    ///   reason other than the table already existing
    pub async fn open(config: Config) -> StoreResult<Self> {
        Request::spawn(RequestKind::Open, move || Self::open_blocking(&config)).await
    }

    fn open_blocking(config: &Config) -> StoreResult<Self> {
        let (backend, dir): (Box<dyn StorageBackend>, Option<StoreDir>) = match &config.location {
            StoreLocation::InMemory => (Box::new(InMemoryBackend::new()), None),
            StoreLocation::Directory(path) => {
                let dir = StoreDir::open(path, config.create_if_missing).map_err(|e| {
                    if matches!(e, DirError::Locked(_)) {
                        StoreError::OpenBlocked {
                            reason: e.to_string(),
                        }
                    } else {
                        StoreError::open_failed(e.to_string())
                    }
                })?;
                let backend = FileBackend::open(&dir.log_path())
                    .map_err(|e| StoreError::open_failed(e.to_string()))?;
                (Box::new(backend), Some(dir))
            }
        };

        let mut log = CommitLog::new(backend, config.sync_on_commit);
        let replay = log
            .replay()
            .map_err(|e| StoreError::open_failed(e.to_string()))?;

        let mut catalog = Catalog::new();
        for entry in &replay.entries {
            catalog
                .apply(entry)
                .map_err(|e| StoreError::open_failed(format!("log replay failed: {e}")))?;
        }

        if let Some(stored) = catalog.version() {
            if stored > config.schema_version {
                return Err(StoreError::open_failed(format!(
                    "store has schema version {stored}, newer than requested version {}",
                    config.schema_version
                )));
            }
        }

        let from = catalog.version();
        let entries = catalog
            .upgrade(config.schema_version, &store_schema())
            .map_err(|e| StoreError::schema_create_failed(e.to_string()))?;
        if !entries.is_empty() {
            log.append_all(&entries)
                .map_err(|e| StoreError::schema_create_failed(e.to_string()))?;
            tracing::info!(
                from = ?from,
                to = config.schema_version,
                "store schema initialized"
            );
        }

        let mut take = |name: TableName| {
            catalog.take(name).ok_or_else(|| {
                StoreError::schema_create_failed(format!("table `{name}` missing after schema creation"))
            })
        };
        let tree = take(TableName::Tree)?;
        let data = take(TableName::Data)?;

        let id = Uuid::new_v4();
        tracing::info!(
            connection = %id,
            location = ?config.location,
            tree_records = tree.len(),
            data_records = data.len(),
            "store opened"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                schema_version: config.schema_version,
                tree: Arc::new(RwLock::new(tree)),
                data: Arc::new(RwLock::new(data)),
                log: Arc::new(Mutex::new(log)),
                dir: Mutex::new(dir),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Opens a transaction scope on `table`.
    ///
    /// A read-write scope waits for every other scope on the same table to
    /// finish; read-only scopes share the table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreAccess`] if the connection is closed.
    pub async fn scope(&self, table: TableName, mode: Mode) -> StoreResult<Scope> {
        self.ensure_open(table)?;
        let lock = match table {
            TableName::Tree => Arc::clone(&self.inner.tree),
            TableName::Data => Arc::clone(&self.inner.data),
        };
        let scope = match mode {
            Mode::ReadOnly => Scope::read(lock.read_owned().await),
            Mode::ReadWrite => Scope::write(lock.write_owned().await, self.clone()),
        };
        self.ensure_open(table)?;
        Ok(scope)
    }

    fn ensure_open(&self, table: TableName) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::store_access(table, "connection is closed"));
        }
        Ok(())
    }

    pub(crate) fn log(&self) -> Arc<Mutex<CommitLog>> {
        Arc::clone(&self.inner.log)
    }

    /// Closes the connection and releases the directory lock. Scopes opened
    /// afterwards fail; commits from scopes still in flight fail too.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.dir.lock().take();
        tracing::info!(connection = %self.inner.id, "store closed");
    }

    /// Returns true once [`Connection::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Unique id of this connection, for logs and identity checks.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns true if both handles refer to the same connection.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The schema version the connection was opened at.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.inner.schema_version
    }
}
