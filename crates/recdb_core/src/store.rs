//! CRUD engine over the tree and data tables.

use crate::error::{StoreError, StoreResult};
use crate::manager::ConnectionManager;
use crate::node::{
    DataRecord, NewTreeNode, TreeNode, TreeNodePatch, DATA_KEY_FIELD, NAME_FIELD,
    PARENT_KEY_FIELD,
};
use crate::record::{merge_update, normalize, Payload, Record};
use crate::scope::Scope;
use crate::types::{validate_key, Key, Mode, RawKey, TableName, NO_KEY};
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Create, read, update, delete and clear over both tables.
///
/// Every operation opens its own scope, so separate calls are independent
/// transactions: two concurrent updates of one record race and the later
/// commit wins. Cheap to clone; clones share the manager and the clock.
///
/// ```rust,no_run
/// # async fn demo() -> recdb_core::StoreResult<()> {
/// use recdb_core::{Config, ConnectionManager, LocalStore};
/// use std::sync::Arc;
///
/// let manager = Arc::new(ConnectionManager::new(Config::at("recordings"))?);
/// let store = LocalStore::new(manager);
///
/// let folder = store.create_folder_node("Unfiled", None).await?;
/// let node = store.create_data_node("take 1", Some(folder), vec![0u8; 16]).await?;
/// assert_eq!(store.read_child_nodes(Some(folder)).await?, vec![node]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LocalStore {
    manager: Arc<ConnectionManager>,
    clock: Arc<Mutex<i64>>,
}

impl LocalStore {
    /// Creates a store over `manager`. Nothing is opened until first use.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            clock: Arc::new(Mutex::new(0)),
        }
    }

    /// The connection manager in use.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    async fn scope(&self, table: TableName, mode: Mode) -> StoreResult<Scope> {
        let conn = self.manager.get_connection().await?;
        conn.scope(table, mode).await
    }

    /// Stores `payload` and returns its generated key.
    ///
    /// Primitive payloads are wrapped as `{ data: payload }`. On the tree
    /// table a `dataKey` field must reference an existing data record; the
    /// data table stays read-locked until the node is committed, so the
    /// record cannot be deleted in between.
    ///
    /// # Errors
    ///
    /// - [`StoreError::FalsyPayload`] for `Null`, empty text or empty bytes
    /// - [`StoreError::InvalidDataKey`] for a dangling `dataKey`
    /// - [`StoreError::AddRequest`] if the insert fails, including a
    ///   duplicate `date` on the tree table
    /// - [`StoreError::StoreAccess`] if no scope could be obtained
    pub async fn create(&self, table: TableName, payload: impl Into<Payload>) -> StoreResult<Key> {
        let payload = payload.into();
        if payload.is_falsy() {
            return Err(StoreError::FalsyPayload { table });
        }
        let stored = normalize(payload);
        let data_lock = match table {
            TableName::Tree => self.check_data_key(&stored.record).await?,
            TableName::Data => None,
        };

        let mut scope = self.scope(table, Mode::ReadWrite).await?;
        let key = scope.add(stored)?;
        scope.commit().await?;
        drop(data_lock);
        tracing::debug!(%table, %key, "record created");
        Ok(key)
    }

    /// Reads the payload at `key`; `None` if there is no such record.
    ///
    /// Records stored from a primitive are unwrapped back to it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] before any storage access if `key`
    /// is not a positive whole number.
    pub async fn read(
        &self,
        table: TableName,
        key: impl Into<RawKey>,
    ) -> StoreResult<Option<Payload>> {
        let key = validate_key(key)?;
        let scope = self.scope(table, Mode::ReadOnly).await?;
        Ok(scope.get(key).map(|stored| stored.into_payload()))
    }

    /// Merges `partial` into the record at `key`. The `id` field is never
    /// changed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidKey`] for a malformed key
    /// - [`StoreError::NoExistingRecord`] if nothing is stored at `key`
    /// - [`StoreError::RecordIdentityMismatch`] if the stored record carries
    ///   another key
    /// - [`StoreError::InvalidDataKey`] for a dangling `dataKey` on the tree
    /// - [`StoreError::PutRequest`] if the write fails
    pub async fn update(
        &self,
        table: TableName,
        key: impl Into<RawKey>,
        partial: impl Into<Record>,
    ) -> StoreResult<bool> {
        let key = validate_key(key)?;
        let partial = partial.into();
        let data_lock = match table {
            TableName::Tree => self.check_data_key(&partial).await?,
            TableName::Data => None,
        };

        let mut scope = self.scope(table, Mode::ReadWrite).await?;
        let existing = scope.get(key).ok_or(StoreError::NoExistingRecord {
            table,
            key: key.get(),
        })?;
        let found = existing.id();
        if found != Some(key.as_i64()) {
            return Err(StoreError::RecordIdentityMismatch {
                table,
                requested: key.get(),
                found,
            });
        }

        scope.put(key, merge_update(&existing, &partial))?;
        scope.commit().await?;
        drop(data_lock);
        tracing::debug!(%table, %key, fields = partial.len(), "record updated");
        Ok(true)
    }

    /// Removes the record at `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] for a malformed key or
    /// [`StoreError::DeleteRequest`] if the delete fails.
    pub async fn delete(&self, table: TableName, key: impl Into<RawKey>) -> StoreResult<bool> {
        let key = validate_key(key)?;
        let mut scope = self.scope(table, Mode::ReadWrite).await?;
        scope.delete(key)?;
        scope.commit().await?;
        tracing::debug!(%table, %key, "record deleted");
        Ok(true)
    }

    /// Empties `table` and returns its name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ClearRequest`] if the clear fails.
    pub async fn clear(&self, table: TableName) -> StoreResult<TableName> {
        let mut scope = self.scope(table, Mode::ReadWrite).await?;
        scope.clear()?;
        scope.commit().await?;
        tracing::info!(%table, "table cleared");
        Ok(table)
    }

    /// Clears the data table, then the tree table, one after the other.
    /// Returns the number of tables cleared.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ClearRequest`] naming the table that failed and
    /// how many were cleared before it. Those stay cleared.
    pub async fn clear_all(&self) -> StoreResult<usize> {
        let mut cleared = 0;
        for table in TableName::ALL {
            if let Err(e) = self.clear(table).await {
                let reason = match e {
                    StoreError::ClearRequest { reason, .. } => reason,
                    other => other.to_string(),
                };
                return Err(StoreError::ClearRequest {
                    table,
                    cleared,
                    reason,
                });
            }
            cleared += 1;
        }
        Ok(cleared)
    }

    /// Number of records in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreAccess`] if no scope could be obtained.
    pub async fn count(&self, table: TableName) -> StoreResult<usize> {
        Ok(self.scope(table, Mode::ReadOnly).await?.count())
    }

    /// Creates a tree node.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::create`].
    pub async fn create_tree_node(&self, node: NewTreeNode) -> StoreResult<Key> {
        self.create(TableName::Tree, node.into_record()).await
    }

    /// Reads a tree node.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::read`]; a stored record that is not a tree node is a
    /// [`StoreError::GetRequest`].
    pub async fn read_tree_node(&self, key: impl Into<RawKey>) -> StoreResult<Option<TreeNode>> {
        match self.read(TableName::Tree, key).await? {
            Some(payload) => tree_node(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Merges `patch` into a tree node.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::update`].
    pub async fn update_tree_node(
        &self,
        key: impl Into<RawKey>,
        patch: TreeNodePatch,
    ) -> StoreResult<bool> {
        self.update(TableName::Tree, key, patch).await
    }

    /// Deletes a tree node record, leaving any data record it references.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::delete`].
    pub async fn delete_tree_node_record(&self, key: impl Into<RawKey>) -> StoreResult<bool> {
        self.delete(TableName::Tree, key).await
    }

    /// Stores a data payload.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::create`].
    pub async fn create_data_record(&self, data: impl Into<Payload>) -> StoreResult<Key> {
        self.create(TableName::Data, data).await
    }

    /// Reads a data record. A record stored from a structured payload comes
    /// back with its whole field map (including `id`) as `data`.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::read`].
    pub async fn read_data_record(&self, key: impl Into<RawKey>) -> StoreResult<Option<DataRecord>> {
        let key = validate_key(key)?;
        Ok(self
            .read(TableName::Data, key)
            .await?
            .map(|payload| DataRecord {
                id: key,
                data: payload.into_value(),
            }))
    }

    /// Merges `partial` into a data record.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::update`].
    pub async fn update_data_record(
        &self,
        key: impl Into<RawKey>,
        partial: impl Into<Record>,
    ) -> StoreResult<bool> {
        self.update(TableName::Data, key, partial).await
    }

    /// Deletes a data record. Tree nodes still pointing at it are left as they
    /// are.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::delete`].
    pub async fn delete_data_record(&self, key: impl Into<RawKey>) -> StoreResult<bool> {
        self.delete(TableName::Data, key).await
    }

    /// Empties the tree table.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::clear`].
    pub async fn clear_tree(&self) -> StoreResult<TableName> {
        self.clear(TableName::Tree).await
    }

    /// Empties the data table.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::clear`].
    pub async fn clear_data(&self) -> StoreResult<TableName> {
        self.clear(TableName::Data).await
    }

    /// Creates a folder under `parent_key` (`None` for root level), dated now.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::create`].
    pub async fn create_folder_node(
        &self,
        name: impl Into<String>,
        parent_key: Option<Key>,
    ) -> StoreResult<Key> {
        let node = NewTreeNode::folder(name, parent_key, self.now_millis());
        self.create_tree_node(node).await
    }

    /// Stores `data` and a leaf node under `parent_key` pointing at it.
    ///
    /// If the node cannot be created the data record is removed again.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever create failed.
    pub async fn create_data_node(
        &self,
        name: impl Into<String>,
        parent_key: Option<Key>,
        data: impl Into<Payload>,
    ) -> StoreResult<TreeNode> {
        let data_key = self.create_data_record(data).await?;
        let node = NewTreeNode::leaf(name, parent_key, self.now_millis(), data_key);

        match self.create_tree_node(node.clone()).await {
            Ok(id) => Ok(TreeNode {
                id,
                name: node.name,
                parent_key: node.parent_key,
                date: node.date,
                data_key: node.data_key,
            }),
            Err(e) => {
                if let Err(cleanup) = self.delete_data_record(data_key).await {
                    tracing::warn!(%data_key, error = %cleanup, "orphaned data record");
                }
                Err(e)
            }
        }
    }

    /// Nodes whose parent is `parent_key` (`None` for root level), in key
    /// order. Tree records that are not well-formed nodes are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreAccess`] if no scope could be obtained.
    pub async fn read_child_nodes(&self, parent_key: Option<Key>) -> StoreResult<Vec<TreeNode>> {
        let parent = Value::Integer(parent_key.map_or(NO_KEY as i64, Key::as_i64));
        self.read_nodes_by(PARENT_KEY_FIELD, &parent).await
    }

    /// Nodes called `name`, in key order. Malformed tree records are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreAccess`] if no scope could be obtained.
    pub async fn read_nodes_by_name(&self, name: &str) -> StoreResult<Vec<TreeNode>> {
        self.read_nodes_by(NAME_FIELD, &Value::from(name)).await
    }

    async fn read_nodes_by(&self, index: &str, value: &Value) -> StoreResult<Vec<TreeNode>> {
        let scope = self.scope(TableName::Tree, Mode::ReadOnly).await?;
        let nodes = scope
            .lookup(index, value)?
            .into_iter()
            .filter_map(|key| {
                let stored = scope.get(key)?;
                match tree_node(&stored.into_payload()) {
                    Ok(node) => Some(node),
                    Err(e) => {
                        tracing::warn!(%key, error = %e, "skipping malformed tree record");
                        None
                    }
                }
            })
            .collect();
        Ok(nodes)
    }

    /// Deletes a tree node; with `remove_data`, also the data record a leaf
    /// points at. Deleting an absent node succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] for a malformed key, or the error
    /// of the failing read or delete.
    pub async fn delete_tree_node(
        &self,
        key: impl Into<RawKey>,
        remove_data: bool,
    ) -> StoreResult<bool> {
        let key = validate_key(key)?;
        let node = if remove_data {
            self.read_tree_node(key).await?
        } else {
            None
        };
        self.delete_tree_node_record(key).await?;
        if let Some(data_key) = node.and_then(|node| node.data_key) {
            self.delete_data_record(data_key).await?;
        }
        Ok(true)
    }

    /// Checks that a `dataKey` on `record` names a stored data record and
    /// returns the data scope that saw it. Holding the scope keeps deletes
    /// of that record out until it is dropped.
    async fn check_data_key(&self, record: &Record) -> StoreResult<Option<Scope>> {
        let candidate = match record.get(DATA_KEY_FIELD) {
            None | Some(Value::Null) => return Ok(None),
            Some(candidate) => candidate,
        };
        let invalid = || StoreError::InvalidDataKey {
            data_key: format!("{candidate:?}"),
        };
        let key = candidate
            .as_i64()
            .and_then(|v| validate_key(v).ok())
            .ok_or_else(invalid)?;
        let scope = self.scope(TableName::Data, Mode::ReadOnly).await?;
        if scope.get(key).is_none() {
            return Err(StoreError::InvalidDataKey {
                data_key: key.to_string(),
            });
        }
        Ok(Some(scope))
    }

    /// Milliseconds since the epoch, strictly increasing per store so
    /// generated `date` values never collide.
    fn now_millis(&self) -> i64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        let mut last = self.clock.lock();
        *last = wall.max(*last + 1);
        *last
    }
}

fn tree_node(payload: &Payload) -> StoreResult<TreeNode> {
    let record = payload.as_record().ok_or_else(|| StoreError::GetRequest {
        table: TableName::Tree,
        reason: "stored value is not a tree node".into(),
    })?;
    TreeNode::from_record(record).map_err(|e| StoreError::GetRequest {
        table: TableName::Tree,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::log::{encode_frame, LogEntry, LogOp};
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store() -> LocalStore {
        LocalStore::new(Arc::new(
            ConnectionManager::new(Config::in_memory()).unwrap(),
        ))
    }

    #[tokio::test]
    async fn falsy_payloads_are_refused() {
        let store = store();
        for payload in [Value::Null, Value::from(""), Value::Bytes(Vec::new())] {
            assert_eq!(
                store.create(TableName::Data, payload).await,
                Err(StoreError::FalsyPayload {
                    table: TableName::Data
                })
            );
        }
        assert!(store.create(TableName::Data, 0i64).await.is_ok());
        assert!(store.create(TableName::Data, false).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_key_fails_before_opening() {
        let store = store();
        assert!(matches!(
            store.read(TableName::Tree, 3.5).await,
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(matches!(
            store.delete(TableName::Data, 0).await,
            Err(StoreError::InvalidKey { .. })
        ));
        assert_eq!(store.manager().open_attempts(), 0);
    }

    #[tokio::test]
    async fn identity_mismatch_is_detected() {
        let tmp = tempdir().unwrap();
        let manager = ConnectionManager::new(Config::at(tmp.path())).unwrap();
        manager.init().await.unwrap();
        manager.close();

        // A record filed under key 1 that claims to be record 7.
        let mut forged = normalize("y");
        forged.record.set("id", 7);
        let entry = LogEntry::Commit {
            table: TableName::Data,
            next_id: 2,
            ops: vec![LogOp::Put {
                key: Key::new(1).unwrap(),
                record: forged,
            }],
        };
        let mut file = OpenOptions::new()
            .append(true)
            .open(tmp.path().join("recdb.log"))
            .unwrap();
        file.write_all(&encode_frame(&entry).unwrap()).unwrap();
        drop(file);

        let store = LocalStore::new(Arc::new(
            ConnectionManager::new(Config::at(tmp.path())).unwrap(),
        ));
        let patch = Record::new().with("data", "z");
        assert_eq!(
            store.update(TableName::Data, 1, patch.clone()).await,
            Err(StoreError::RecordIdentityMismatch {
                table: TableName::Data,
                requested: 1,
                found: Some(7),
            })
        );
        assert_eq!(
            store.update(TableName::Data, 2, patch).await,
            Err(StoreError::NoExistingRecord {
                table: TableName::Data,
                key: 2,
            })
        );
    }

    #[tokio::test]
    async fn failed_leaf_creation_removes_its_data() {
        let store = store();
        *store.clock.lock() = 5_000_000_000_000;
        store
            .create_tree_node(NewTreeNode::folder("taken", None, 5_000_000_000_001))
            .await
            .unwrap();

        let result = store.create_data_node("leaf", None, vec![1u8]).await;
        assert!(matches!(result, Err(StoreError::AddRequest { .. })));
        assert_eq!(store.count(TableName::Data).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clock_is_strictly_increasing() {
        let store = store();
        let a = store.now_millis();
        let b = store.now_millis();
        assert!(b > a);
    }

    #[tokio::test]
    async fn dangling_data_key_is_rejected() {
        let store = store();
        let missing = Key::new(41).unwrap();
        let node = NewTreeNode::leaf("x", None, 1, missing);
        assert_eq!(
            store.create_tree_node(node).await,
            Err(StoreError::InvalidDataKey {
                data_key: "41".into()
            })
        );

        let record = NewTreeNode::folder("x", None, 2)
            .into_record()
            .with(DATA_KEY_FIELD, "nope");
        assert!(matches!(
            store.create(TableName::Tree, record).await,
            Err(StoreError::InvalidDataKey { .. })
        ));
    }

    #[tokio::test]
    async fn referenced_data_outlives_the_leaf_commit() {
        let store = store();
        let data_key = store.create_data_record("audio").await.unwrap();

        // Park the tree table so the leaf create stalls after its data check.
        let conn = store.manager().get_connection().await.unwrap();
        let tree_reader = conn.scope(TableName::Tree, Mode::ReadOnly).await.unwrap();
        let creating = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .create_tree_node(NewTreeNode::leaf("take", None, 1, data_key))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let deleting = tokio::spawn({
            let store = store.clone();
            async move { store.delete_data_record(data_key).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!deleting.is_finished());
        assert!(!creating.is_finished());

        drop(tree_reader);
        let leaf = creating.await.unwrap().unwrap();
        assert!(deleting.await.unwrap().unwrap());
        assert_eq!(
            store.read_tree_node(leaf).await.unwrap().unwrap().data_key,
            Some(data_key)
        );
    }

    #[tokio::test]
    async fn malformed_tree_records_are_skipped_in_listings() {
        let store = store();
        let folder = store.create_folder_node("Unfiled", None).await.unwrap();
        let nameless = Record::new().with(PARENT_KEY_FIELD, 0).with("date", 1);
        store.create(TableName::Tree, nameless).await.unwrap();

        let children = store.read_child_nodes(None).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, folder);
        assert_eq!(store.count(TableName::Tree).await.unwrap(), 2);
    }
}
