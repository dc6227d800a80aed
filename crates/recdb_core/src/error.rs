//! Error types for recdb core operations.

use crate::types::TableName;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Every way a store operation can fail.
///
/// Each operation resolves to exactly one value or exactly one of these.
/// Nothing is retried. Underlying causes are carried as text so the error is
/// `Clone`: a failed open is replayed to every caller of
/// [`crate::ConnectionManager::get_connection`] until the manager is closed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No usable storage capability at the configured location.
    #[error("unsupported environment: {reason}")]
    UnsupportedEnvironment {
        /// What is missing.
        reason: String,
    },

    /// The connection could not be established.
    #[error("open failed: {reason}")]
    OpenFailed {
        /// Why the open failed.
        reason: String,
    },

    /// Another connection holds the store, so this open is blocked.
    #[error("open blocked: {reason}")]
    OpenBlocked {
        /// Who is blocking.
        reason: String,
    },

    /// Creating a table or index failed for a reason other than "already exists".
    #[error("schema creation failed: {reason}")]
    SchemaCreateFailed {
        /// Why creation failed.
        reason: String,
    },

    /// A transaction scope on a table could not be obtained.
    #[error("cannot access table {table}: {reason}")]
    StoreAccess {
        /// Table that was requested.
        table: TableName,
        /// Why access failed.
        reason: String,
    },

    /// The candidate key is not a positive whole number.
    #[error("invalid key: {candidate}")]
    InvalidKey {
        /// The rejected candidate, as given.
        candidate: String,
    },

    /// `create` was called with an empty or absent payload.
    #[error("refusing to add empty payload to {table}")]
    FalsyPayload {
        /// Target table.
        table: TableName,
    },

    /// `update` targeted a key with no stored record.
    #[error("no record {key} in {table} to update")]
    NoExistingRecord {
        /// Target table.
        table: TableName,
        /// Requested key.
        key: u64,
    },

    /// The record fetched for `update` does not carry the requested key.
    #[error("record fetched from {table} for key {requested} carries key {found:?}")]
    RecordIdentityMismatch {
        /// Target table.
        table: TableName,
        /// Requested key.
        requested: u64,
        /// Key found on the stored record, if any.
        found: Option<i64>,
    },

    /// A tree node references a data record that does not exist.
    #[error("tree node references missing data record {data_key}")]
    InvalidDataKey {
        /// The dangling or malformed reference.
        data_key: String,
    },

    /// Underlying insert failed, including unique index violations.
    #[error("add request on {table} failed: {reason}")]
    AddRequest {
        /// Target table.
        table: TableName,
        /// Why the insert failed.
        reason: String,
    },

    /// Underlying fetch failed.
    #[error("get request on {table} failed: {reason}")]
    GetRequest {
        /// Target table.
        table: TableName,
        /// Why the fetch failed.
        reason: String,
    },

    /// Underlying write-back failed.
    #[error("put request on {table} failed: {reason}")]
    PutRequest {
        /// Target table.
        table: TableName,
        /// Why the write failed.
        reason: String,
    },

    /// Underlying delete failed.
    #[error("delete request on {table} failed: {reason}")]
    DeleteRequest {
        /// Target table.
        table: TableName,
        /// Why the delete failed.
        reason: String,
    },

    /// Clearing a table failed.
    ///
    /// `cleared` counts the tables already emptied by the same call before
    /// this one failed (always 0 for a single-table clear).
    #[error("clearing {table} failed after {cleared} table(s) cleared: {reason}")]
    ClearRequest {
        /// Table whose clear failed.
        table: TableName,
        /// Tables cleared earlier in the same call.
        cleared: usize,
        /// Why the clear failed.
        reason: String,
    },
}

impl StoreError {
    /// Creates an open failure.
    pub fn open_failed(reason: impl Into<String>) -> Self {
        Self::OpenFailed {
            reason: reason.into(),
        }
    }

    /// Creates a schema creation failure.
    pub fn schema_create_failed(reason: impl Into<String>) -> Self {
        Self::SchemaCreateFailed {
            reason: reason.into(),
        }
    }

    /// Creates a store access failure.
    pub fn store_access(table: TableName, reason: impl Into<String>) -> Self {
        Self::StoreAccess {
            table,
            reason: reason.into(),
        }
    }

    /// Returns true if this error was raised while opening the connection.
    ///
    /// Open-time failures stay in effect until the manager is closed; every
    /// other failure ends only the operation that raised it.
    #[must_use]
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedEnvironment { .. }
                | Self::OpenFailed { .. }
                | Self::OpenBlocked { .. }
                | Self::SchemaCreateFailed { .. }
        )
    }
}
