//! Secondary indexes over a record field.

use crate::record::Record;
use crate::types::Key;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Indexed record field.
    pub field: String,
    /// Whether two records may share a value.
    pub unique: bool,
}

impl IndexDef {
    /// A non-unique index named after its field.
    pub fn on(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            field,
            unique: false,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Ordered value-to-keys index.
///
/// Records without the field, or with `Null` in it, are not indexed.
#[derive(Debug, Clone)]
pub struct Index {
    def: IndexDef,
    entries: BTreeMap<Value, BTreeSet<Key>>,
    count: usize,
}

impl Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
            count: 0,
        }
    }

    /// The index definition.
    #[must_use]
    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// The value this index files `record` under, if any.
    #[must_use]
    pub fn value_of<'r>(&self, record: &'r Record) -> Option<&'r Value> {
        record
            .get(&self.def.field)
            .filter(|value| !matches!(value, Value::Null))
    }

    /// Adds `record` under `key`. Uniqueness is checked by the writer before
    /// the change is committed, not here.
    pub fn insert(&mut self, key: Key, record: &Record) {
        if let Some(value) = self.value_of(record) {
            if self.entries.entry(value.clone()).or_default().insert(key) {
                self.count += 1;
            }
        }
    }

    /// Removes `record` filed under `key`.
    pub fn remove(&mut self, key: Key, record: &Record) -> bool {
        let Some(value) = self.value_of(record) else {
            return false;
        };
        let Some(keys) = self.entries.get_mut(value) else {
            return false;
        };
        let removed = keys.remove(&key);
        if removed {
            self.count -= 1;
            if keys.is_empty() {
                self.entries.remove(value);
            }
        }
        removed
    }

    /// Keys filed under `value`, in key order.
    #[must_use]
    pub fn lookup(&self, value: &Value) -> Vec<Key> {
        self.entries
            .get(value)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
    }
}
