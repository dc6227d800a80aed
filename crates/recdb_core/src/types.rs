//! Core type definitions: table names, access modes and keys.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// The "no key" sentinel. Root-level tree nodes carry it as `parentKey`.
pub const NO_KEY: u64 = 0;

/// Largest key the generator hands out (2^53 - 1, the largest whole number a
/// double represents exactly).
pub const MAX_KEY: u64 = (1 << 53) - 1;

/// The two tables of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TableName {
    /// Hierarchical metadata nodes (folders and leaves).
    Tree,
    /// Opaque payload records referenced by leaf nodes.
    Data,
}

impl TableName {
    /// Both tables, in the order `clear_all` empties them.
    pub const ALL: [TableName; 2] = [TableName::Data, TableName::Tree];

    /// Name of the table in the persisted catalog.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Data => "data",
        }
    }

    /// Looks a table up by its catalog name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tree" => Some(Self::Tree),
            "data" => Some(Self::Data),
            _ => None,
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access mode of a transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Shared access; write requests are rejected.
    ReadOnly,
    /// Exclusive access; writes are staged until commit.
    ReadWrite,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadOnly => f.write_str("readonly"),
            Self::ReadWrite => f.write_str("readwrite"),
        }
    }
}

/// A validated primary key: a whole number in `1..=MAX_KEY`.
///
/// Keys are assigned by the engine when a record is created; callers only
/// ever obtain them from `create` or by validating a [`RawKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Key(NonZeroU64);

impl Key {
    /// Creates a key, returning `None` for `0` or values above [`MAX_KEY`].
    #[must_use]
    pub fn new(value: u64) -> Option<Self> {
        if value > MAX_KEY {
            return None;
        }
        NonZeroU64::new(value).map(Self)
    }

    /// Returns the raw key value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }

    /// Returns the key as the integer stored in record fields.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        // MAX_KEY < i64::MAX, so this never wraps.
        self.0.get() as i64
    }
}

impl TryFrom<u64> for Key {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Key::new(value).ok_or_else(|| format!("{value} is not a valid key"))
    }
}

impl From<Key> for u64 {
    fn from(key: Key) -> Self {
        key.get()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unvalidated key candidate, as handed in by a caller.
///
/// Callers in the UI layer hold keys as plain numbers (often doubles), so the
/// entry points accept anything convertible into a `RawKey` and validate it
/// before touching storage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawKey {
    /// A signed integer candidate.
    Int(i64),
    /// An unsigned integer candidate.
    Uint(u64),
    /// A floating point candidate; may be fractional, infinite or NaN.
    Float(f64),
}

impl From<i64> for RawKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for RawKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for RawKey {
    fn from(value: u64) -> Self {
        Self::Uint(value)
    }
}

impl From<u32> for RawKey {
    fn from(value: u32) -> Self {
        Self::Uint(u64::from(value))
    }
}

impl From<f64> for RawKey {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Key> for RawKey {
    fn from(key: Key) -> Self {
        Self::Uint(key.get())
    }
}

impl fmt::Display for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl RawKey {
    /// Converts the candidate into a [`Key`] if it is a positive whole number.
    #[must_use]
    pub fn to_key(self) -> Option<Key> {
        match self {
            Self::Int(v) => u64::try_from(v).ok().and_then(Key::new),
            Self::Uint(v) => Key::new(v),
            Self::Float(v) => {
                if !v.is_finite() || v <= NO_KEY as f64 || v != v.floor() || v > MAX_KEY as f64 {
                    return None;
                }
                // Whole and within 1..=MAX_KEY, so the cast is exact.
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                Key::new(v as u64)
            }
        }
    }
}

/// Returns true if `candidate` is a valid key: finite, not NaN, greater than
/// [`NO_KEY`] and equal to its own floor.
pub fn is_valid_key(candidate: impl Into<RawKey>) -> bool {
    candidate.into().to_key().is_some()
}

/// Validates `candidate`, failing with [`StoreError::InvalidKey`].
///
/// # Errors
///
/// Returns `InvalidKey` when [`is_valid_key`] would return false.
pub fn validate_key(candidate: impl Into<RawKey>) -> StoreResult<Key> {
    let raw = candidate.into();
    raw.to_key().ok_or_else(|| StoreError::InvalidKey {
        candidate: raw.to_string(),
    })
}
