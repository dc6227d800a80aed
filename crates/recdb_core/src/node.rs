//! Typed views of tree-table and data-table records.
//!
//! The tables themselves store plain [`Record`]s; these types give the UI
//! layer named fields and make the leaf-to-payload link (`dataKey`) explicit.

use crate::record::{Record, DATA_FIELD, ID_FIELD};
use crate::types::{Key, NO_KEY};
use crate::value::Value;
use thiserror::Error;

/// Indexed, non-unique node name.
pub const NAME_FIELD: &str = "name";
/// Indexed, non-unique parent reference; `0` for root-level nodes.
pub const PARENT_KEY_FIELD: &str = "parentKey";
/// Indexed, unique creation timestamp in milliseconds.
pub const DATE_FIELD: &str = "date";
/// Reference from a leaf node to its data-table record.
pub const DATA_KEY_FIELD: &str = "dataKey";

/// A stored record does not have the shape of a tree node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tree node field `{field}` is {problem}")]
pub struct NodeShapeError {
    /// The offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub problem: &'static str,
}

fn shape(field: &'static str, problem: &'static str) -> NodeShapeError {
    NodeShapeError { field, problem }
}

fn key_field(record: &Record, field: &'static str) -> Result<Option<Key>, NodeShapeError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Integer(0)) => Ok(None),
        Some(Value::Integer(v)) => u64::try_from(*v)
            .ok()
            .and_then(Key::new)
            .map(Some)
            .ok_or_else(|| shape(field, "not a valid key")),
        Some(_) => Err(shape(field, "not an integer")),
    }
}

fn parent_value(parent_key: Option<Key>) -> Value {
    Value::Integer(parent_key.map_or(NO_KEY as i64, Key::as_i64))
}

/// A node of the folder tree as read back from the tree table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Engine-assigned key.
    pub id: Key,
    /// Display name.
    pub name: String,
    /// Parent node, or `None` at root level.
    pub parent_key: Option<Key>,
    /// Creation timestamp in milliseconds; unique across the table.
    pub date: i64,
    /// Data record of a leaf; `None` for folders.
    pub data_key: Option<Key>,
}

impl TreeNode {
    /// Returns true if the node references a data record.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.data_key.is_some()
    }

    /// Reads a node from a stored record.
    ///
    /// # Errors
    ///
    /// Returns [`NodeShapeError`] if a field is missing or has the wrong type.
    pub fn from_record(record: &Record) -> Result<Self, NodeShapeError> {
        let id = key_field(record, ID_FIELD)?.ok_or_else(|| shape(ID_FIELD, "missing"))?;
        let name = record
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| shape(NAME_FIELD, "missing or not text"))?
            .to_string();
        let date = record
            .get(DATE_FIELD)
            .and_then(Value::as_i64)
            .ok_or_else(|| shape(DATE_FIELD, "missing or not an integer"))?;

        Ok(Self {
            id,
            name,
            parent_key: key_field(record, PARENT_KEY_FIELD)?,
            date,
            data_key: key_field(record, DATA_KEY_FIELD)?,
        })
    }

    /// Converts the node into its stored record, `id` included.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let mut record = NewTreeNode {
            name: self.name.clone(),
            parent_key: self.parent_key,
            date: self.date,
            data_key: self.data_key,
        }
        .into_record();
        record.set(ID_FIELD, self.id.as_i64());
        record
    }
}

/// A tree node that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTreeNode {
    /// Display name.
    pub name: String,
    /// Parent node, or `None` at root level.
    pub parent_key: Option<Key>,
    /// Creation timestamp in milliseconds; must be unique.
    pub date: i64,
    /// Data record of a leaf; `None` for folders.
    pub data_key: Option<Key>,
}

impl NewTreeNode {
    /// A folder node.
    pub fn folder(name: impl Into<String>, parent_key: Option<Key>, date: i64) -> Self {
        Self {
            name: name.into(),
            parent_key,
            date,
            data_key: None,
        }
    }

    /// A leaf node pointing at `data_key`.
    pub fn leaf(name: impl Into<String>, parent_key: Option<Key>, date: i64, data_key: Key) -> Self {
        Self {
            name: name.into(),
            parent_key,
            date,
            data_key: Some(data_key),
        }
    }

    /// Converts into a storable record (no `id`; the engine assigns it).
    #[must_use]
    pub fn into_record(self) -> Record {
        let mut record = Record::new()
            .with(NAME_FIELD, self.name)
            .with(PARENT_KEY_FIELD, parent_value(self.parent_key))
            .with(DATE_FIELD, self.date);
        if let Some(data_key) = self.data_key {
            record.set(DATA_KEY_FIELD, data_key.as_i64());
        }
        record
    }
}

impl From<NewTreeNode> for Record {
    fn from(node: NewTreeNode) -> Self {
        node.into_record()
    }
}

/// A partial update of a tree node. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeNodePatch {
    /// New name.
    pub name: Option<String>,
    /// New parent (`Some(None)` moves the node to root level).
    pub parent_key: Option<Option<Key>>,
    /// New timestamp.
    pub date: Option<i64>,
    /// New data reference (`Some(None)` turns the node into a folder).
    pub data_key: Option<Option<Key>>,
}

impl TreeNodePatch {
    /// A patch that only renames.
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A patch that only moves the node under `parent_key`.
    #[must_use]
    pub fn move_to(parent_key: Option<Key>) -> Self {
        Self {
            parent_key: Some(parent_key),
            ..Self::default()
        }
    }

    /// Converts into the partial record merged by `update`.
    #[must_use]
    pub fn into_record(self) -> Record {
        let mut record = Record::new();
        if let Some(name) = self.name {
            record.set(NAME_FIELD, name);
        }
        if let Some(parent_key) = self.parent_key {
            record.set(PARENT_KEY_FIELD, parent_value(parent_key));
        }
        if let Some(date) = self.date {
            record.set(DATE_FIELD, date);
        }
        if let Some(data_key) = self.data_key {
            record.set(DATA_KEY_FIELD, data_key.map(Key::as_i64));
        }
        record
    }
}

impl From<TreeNodePatch> for Record {
    fn from(patch: TreeNodePatch) -> Self {
        patch.into_record()
    }
}

/// A data-table record with its payload unwrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRecord {
    /// Engine-assigned key.
    pub id: Key,
    /// The stored payload.
    pub data: Value,
}

impl DataRecord {
    /// Builds the stored form `{ id, data }`.
    #[must_use]
    pub fn to_record(&self) -> Record {
        Record::new()
            .with(ID_FIELD, self.id.as_i64())
            .with(DATA_FIELD, self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(v: u64) -> Key {
        Key::new(v).unwrap()
    }

    #[test]
    fn folder_record_has_no_data_key() {
        let record = NewTreeNode::folder("Unfiled", None, 100).into_record();
        assert_eq!(record.get(PARENT_KEY_FIELD), Some(&Value::Integer(0)));
        assert!(!record.contains(DATA_KEY_FIELD));
        assert!(!record.contains(ID_FIELD));
    }

    #[test]
    fn node_round_trips_through_record() {
        let node = TreeNode {
            id: key(4),
            name: "2016-3-2 -- 10:01:02".into(),
            parent_key: Some(key(1)),
            date: 1_456_912_862_000,
            data_key: Some(key(9)),
        };
        assert_eq!(TreeNode::from_record(&node.to_record()).unwrap(), node);
        assert!(node.is_leaf());
    }

    #[test]
    fn null_data_key_reads_as_folder() {
        let record = NewTreeNode::folder("f", Some(key(2)), 5)
            .into_record()
            .with(ID_FIELD, 3)
            .with(DATA_KEY_FIELD, Value::Null);
        let node = TreeNode::from_record(&record).unwrap();
        assert_eq!(node.data_key, None);
        assert_eq!(node.parent_key, Some(key(2)));
    }

    #[test]
    fn malformed_records_are_rejected() {
        let record = Record::new().with(ID_FIELD, 1).with(DATE_FIELD, 5);
        assert_eq!(
            TreeNode::from_record(&record).unwrap_err().field,
            NAME_FIELD
        );

        let record = NewTreeNode::folder("f", None, 5)
            .into_record()
            .with(ID_FIELD, 1)
            .with(DATA_KEY_FIELD, "nine");
        assert_eq!(
            TreeNode::from_record(&record).unwrap_err(),
            NodeShapeError {
                field: DATA_KEY_FIELD,
                problem: "not an integer"
            }
        );
    }

    #[test]
    fn patch_only_carries_present_fields() {
        let record = TreeNodePatch::rename("B").into_record();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get(NAME_FIELD), Some(&Value::from("B")));

        let record = TreeNodePatch {
            data_key: Some(None),
            ..TreeNodePatch::default()
        }
        .into_record();
        assert_eq!(record.get(DATA_KEY_FIELD), Some(&Value::Null));

        let record = TreeNodePatch::move_to(None).into_record();
        assert_eq!(record.get(PARENT_KEY_FIELD), Some(&Value::Integer(0)));
    }
}
