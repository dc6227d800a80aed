//! In-memory state of one table, rebuilt from the commit log.

use crate::index::{Index, IndexDef};
use crate::log::LogOp;
use crate::record::StoredRecord;
use crate::types::{Key, TableName};
use std::collections::BTreeMap;

/// Records of one table plus its key generator and secondary indexes.
#[derive(Debug, Clone)]
pub struct Table {
    name: TableName,
    key_path: String,
    auto_increment: bool,
    records: BTreeMap<Key, StoredRecord>,
    next_id: u64,
    indexes: Vec<Index>,
}

impl Table {
    /// Creates an empty table.
    pub fn new(name: TableName, key_path: impl Into<String>, auto_increment: bool) -> Self {
        Self {
            name,
            key_path: key_path.into(),
            auto_increment,
            records: BTreeMap::new(),
            next_id: 1,
            indexes: Vec::new(),
        }
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> TableName {
        self.name
    }

    /// Record field holding the primary key.
    #[must_use]
    pub fn key_path(&self) -> &str {
        &self.key_path
    }

    /// Whether keys are generated on insert.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// The key the next insert receives.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Moves the key generator forward. It never moves back.
    pub fn advance_next_id(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }

    /// Adds a secondary index and files existing records under it.
    pub fn add_index(&mut self, def: IndexDef) {
        let mut index = Index::new(def);
        for (key, stored) in &self.records {
            index.insert(*key, &stored.record);
        }
        self.indexes.push(index);
    }

    /// The index called `name`.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|index| index.def().name == name)
    }

    /// All secondary indexes.
    #[must_use]
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    /// The record at `key`.
    #[must_use]
    pub fn get(&self, key: Key) -> Option<&StoredRecord> {
        self.records.get(&key)
    }

    /// Iterates over records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &StoredRecord)> {
        self.records.iter().map(|(key, stored)| (*key, stored))
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Applies a committed mutation.
    pub fn apply(&mut self, op: &LogOp) {
        match op {
            LogOp::Put { key, record } => {
                self.remove(*key);
                for index in &mut self.indexes {
                    index.insert(*key, &record.record);
                }
                self.records.insert(*key, record.clone());
                self.advance_next_id(key.get() + 1);
            }
            LogOp::Delete { key } => {
                self.remove(*key);
            }
            LogOp::Clear => {
                self.records.clear();
                for index in &mut self.indexes {
                    index.clear();
                }
            }
        }
    }

    fn remove(&mut self, key: Key) -> Option<StoredRecord> {
        let old = self.records.remove(&key)?;
        for index in &mut self.indexes {
            index.remove(key, &old.record);
        }
        Some(old)
    }
}
