//! Records, payload normalization and merge-update.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field holding the primary key of every stored record.
pub const ID_FIELD: &str = "id";

/// Field a primitive payload is wrapped under.
pub const DATA_FIELD: &str = "data";

/// A structured record: named fields mapped to values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Builder form of [`Record::set`].
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Returns true if the record has the field.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Iterates fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The record's own key, read from the `id` field.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.get(ID_FIELD).and_then(Value::as_i64)
    }

    /// Converts the record into a `Value::Map`.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Map(self.0)
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self(fields)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// What a caller hands to `create` or `update`, and what `read` hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// A bare value (number, text, blob...). Stored wrapped as `{ data: value }`.
    Primitive(Value),
    /// A record, stored as-is.
    Structured(Record),
}

impl Payload {
    /// Returns true if this payload counts as empty or absent.
    #[must_use]
    pub fn is_falsy(&self) -> bool {
        match self {
            Self::Primitive(v) => v.is_falsy(),
            Self::Structured(_) => false,
        }
    }

    /// Returns the primitive value, if this is one.
    #[must_use]
    pub fn as_primitive(&self) -> Option<&Value> {
        match self {
            Self::Primitive(v) => Some(v),
            Self::Structured(_) => None,
        }
    }

    /// Returns the record, if this is one.
    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Primitive(_) => None,
            Self::Structured(r) => Some(r),
        }
    }

    /// Converts back into a single value.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Primitive(v) => v,
            Self::Structured(r) => r.into_value(),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Map(fields) => Self::Structured(Record(fields)),
            other => Self::Primitive(other),
        }
    }
}

impl From<Record> for Payload {
    fn from(record: Record) -> Self {
        Self::Structured(record)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Self::Primitive(Value::Bytes(v))
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Self::Primitive(Value::from(v))
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Self::Primitive(Value::Text(v))
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Self::Primitive(Value::Integer(v))
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Self::Primitive(Value::Float(v))
    }
}

impl From<bool> for Payload {
    fn from(v: bool) -> Self {
        Self::Primitive(Value::Bool(v))
    }
}

/// A record as held by a table: the field map plus whether it was wrapped
/// from a primitive, so reads can hand the primitive back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// The stored fields, including `id` once assigned.
    pub record: Record,
    /// True if `record` is `{ data: primitive }` produced by [`normalize`].
    pub wrapped: bool,
}

impl StoredRecord {
    /// The record's own key.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.record.id()
    }

    /// Turns the stored record back into what the caller originally stored.
    #[must_use]
    pub fn into_payload(mut self) -> Payload {
        if self.wrapped {
            Payload::Primitive(self.record.remove(DATA_FIELD).unwrap_or_default())
        } else {
            Payload::Structured(self.record)
        }
    }
}

/// Coerces a payload into a storable record.
///
/// Records pass through unchanged; anything else becomes `{ data: value }`.
pub fn normalize(payload: impl Into<Payload>) -> StoredRecord {
    match payload.into() {
        Payload::Structured(record) => StoredRecord {
            record,
            wrapped: false,
        },
        Payload::Primitive(value) => StoredRecord {
            record: Record::new().with(DATA_FIELD, value),
            wrapped: true,
        },
    }
}

/// Merges `partial` over `existing` into a new record image.
///
/// Every field present on `partial` overwrites the field on the copy; fields
/// absent from `partial` are kept. The `id` field is never taken from
/// `partial`. `existing` is not modified.
#[must_use]
pub fn merge_update(existing: &StoredRecord, partial: &Record) -> StoredRecord {
    let mut merged = existing.clone();
    for (field, value) in partial.fields() {
        if field == ID_FIELD {
            continue;
        }
        merged.record.set(field, value.clone());
    }
    merged.wrapped = existing.wrapped
        && merged
            .record
            .fields()
            .all(|(field, _)| field == ID_FIELD || field == DATA_FIELD);
    merged
}
