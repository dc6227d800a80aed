//! Transaction scopes: one table, one mode, one atomic commit.

use crate::connection::Connection;
use crate::error::StoreResult;
use crate::log::{LogEntry, LogOp};
use crate::request::{Request, RequestKind};
use crate::record::{Record, StoredRecord};
use crate::table::Table;
use crate::types::{Key, Mode, TableName};
use crate::value::Value;
use std::collections::BTreeMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

enum Guard {
    Read(OwnedRwLockReadGuard<Table>),
    Write(OwnedRwLockWriteGuard<Table>, Connection),
}

impl Guard {
    fn table(&self) -> &Table {
        match self {
            Self::Read(guard) => &**guard,
            Self::Write(guard, _) => &**guard,
        }
    }
}

#[derive(Debug, Default)]
struct Staged {
    cleared: bool,
    writes: BTreeMap<Key, Option<StoredRecord>>,
    next_id: Option<u64>,
    kind: Option<RequestKind>,
}

impl Staged {
    fn is_empty(&self) -> bool {
        !self.cleared && self.writes.is_empty() && self.next_id.is_none()
    }
}

/// A handle on one table for one transaction.
///
/// Reads see the committed table overlaid with this scope's own staged
/// writes. Writes stay in the scope until [`Scope::commit`] appends them to
/// the log as a single entry; dropping the scope discards them.
pub struct Scope {
    guard: Guard,
    staged: Staged,
}

impl Scope {
    pub(crate) fn read(guard: OwnedRwLockReadGuard<Table>) -> Self {
        Self {
            guard: Guard::Read(guard),
            staged: Staged::default(),
        }
    }

    pub(crate) fn write(guard: OwnedRwLockWriteGuard<Table>, conn: Connection) -> Self {
        Self {
            guard: Guard::Write(guard, conn),
            staged: Staged::default(),
        }
    }

    /// The table this scope is bound to.
    #[must_use]
    pub fn table(&self) -> TableName {
        self.guard.table().name()
    }

    /// The scope's access mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        match self.guard {
            Guard::Read(_) => Mode::ReadOnly,
            Guard::Write(..) => Mode::ReadWrite,
        }
    }

    /// The record at `key`, if any.
    #[must_use]
    pub fn get(&self, key: Key) -> Option<StoredRecord> {
        match self.staged.writes.get(&key) {
            Some(write) => write.clone(),
            None if self.staged.cleared => None,
            None => self.guard.table().get(key).cloned(),
        }
    }

    /// Number of records visible to this scope.
    #[must_use]
    pub fn count(&self) -> usize {
        let base = self.guard.table();
        if self.staged.cleared {
            return self.staged.writes.values().filter(|w| w.is_some()).count();
        }
        self.staged
            .writes
            .iter()
            .fold(base.len(), |count, (key, write)| {
                match (base.get(*key).is_some(), write.is_some()) {
                    (false, true) => count + 1,
                    (true, false) => count - 1,
                    _ => count,
                }
            })
    }

    /// Keys filed under `value` in the index called `index`, in key order.
    ///
    /// # Errors
    ///
    /// Returns a get-request error if the table has no such index.
    pub fn lookup(&self, index: &str, value: &Value) -> StoreResult<Vec<Key>> {
        let base = self.guard.table();
        let index = base.index(index).ok_or_else(|| {
            RequestKind::Get(base.name()).failure(format!("no index named `{index}`"))
        })?;

        let mut keys: Vec<Key> = if self.staged.cleared {
            Vec::new()
        } else {
            index
                .lookup(value)
                .into_iter()
                .filter(|key| !self.staged.writes.contains_key(key))
                .collect()
        };
        keys.extend(self.staged.writes.iter().filter_map(|(key, write)| {
            let stored = write.as_ref()?;
            (index.value_of(&stored.record) == Some(value)).then_some(*key)
        }));
        keys.sort_unstable();
        Ok(keys)
    }

    /// Stages an insert and returns the generated key.
    ///
    /// Any key already present on the record is replaced by the generated one.
    ///
    /// # Errors
    ///
    /// Returns an add-request error on a read-only scope, when the key space
    /// is exhausted, or when a unique index already holds one of the record's
    /// values.
    pub fn add(&mut self, mut stored: StoredRecord) -> StoreResult<Key> {
        let kind = RequestKind::Add(self.table());
        self.writable(kind)?;

        let table = self.guard.table();
        let next = self.staged.next_id.unwrap_or_else(|| table.next_id());
        let key = Key::new(next).ok_or_else(|| kind.failure("key generator exhausted"))?;
        let key_path = table.key_path().to_string();
        stored.record.set(key_path, key.as_i64());
        self.check_unique(kind, key, &stored.record)?;

        self.staged.next_id = Some(next + 1);
        self.stage(kind, key, Some(stored));
        Ok(key)
    }

    /// Stages a replacement of the record at `key`.
    ///
    /// # Errors
    ///
    /// Returns a put-request error on a read-only scope, when the record's own
    /// key differs from `key`, or on a unique index violation.
    pub fn put(&mut self, key: Key, stored: StoredRecord) -> StoreResult<()> {
        let kind = RequestKind::Put(self.table());
        self.writable(kind)?;

        let key_path = self.guard.table().key_path();
        if stored.record.get(key_path).and_then(Value::as_i64) != Some(key.as_i64()) {
            return Err(kind.failure(format!("record `{key_path}` does not match key {key}")));
        }
        self.check_unique(kind, key, &stored.record)?;
        self.stage(kind, key, Some(stored));
        Ok(())
    }

    /// Stages removal of `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns a delete-request error on a read-only scope.
    pub fn delete(&mut self, key: Key) -> StoreResult<()> {
        let kind = RequestKind::Delete(self.table());
        self.writable(kind)?;
        self.stage(kind, key, None);
        Ok(())
    }

    /// Stages removal of every record.
    ///
    /// # Errors
    ///
    /// Returns a clear-request error on a read-only scope.
    pub fn clear(&mut self) -> StoreResult<()> {
        let kind = RequestKind::Clear(self.table());
        self.writable(kind)?;
        self.staged.cleared = true;
        self.staged.writes.clear();
        self.staged.kind.get_or_insert(kind);
        Ok(())
    }

    /// Makes the staged writes durable and visible, as one log entry.
    ///
    /// A read-only scope, or one with nothing staged, commits trivially.
    /// The append and the in-memory apply run together on the blocking pool
    /// while the table stays write-locked, so dropping this future part way
    /// leaves the live table and the log in agreement.
    ///
    /// # Errors
    ///
    /// Fails with the error kind of the first staged operation if the
    /// connection was closed or the log append fails. Nothing is applied
    /// in that case.
    pub async fn commit(self) -> StoreResult<()> {
        let Self { guard, staged } = self;
        let Guard::Write(mut table, conn) = guard else {
            return Ok(());
        };
        if staged.is_empty() {
            return Ok(());
        }

        let name = table.name();
        let kind = staged.kind.unwrap_or(RequestKind::Put(name));
        if conn.is_closed() {
            return Err(kind.failure("connection is closed"));
        }

        let mut ops = Vec::with_capacity(staged.writes.len() + 1);
        if staged.cleared {
            ops.push(LogOp::Clear);
        }
        ops.extend(staged.writes.into_iter().map(|(key, write)| match write {
            Some(record) => LogOp::Put { key, record },
            None => LogOp::Delete { key },
        }));
        let next_id = staged.next_id.unwrap_or_else(|| table.next_id());
        let entry = LogEntry::Commit {
            table: name,
            next_id,
            ops,
        };

        let log = conn.log();
        Request::spawn(kind, move || {
            log.lock()
                .append(&entry)
                .map_err(|e| kind.failure(e.to_string()))?;

            if let LogEntry::Commit { ops, .. } = &entry {
                for op in ops {
                    table.apply(op);
                }
                tracing::debug!(table = %name, ops = ops.len(), next_id, "committed");
            }
            table.advance_next_id(next_id);
            Ok(())
        })
        .await
    }

    fn writable(&self, kind: RequestKind) -> StoreResult<()> {
        match self.guard {
            Guard::Read(_) => Err(kind.failure("scope is read-only")),
            Guard::Write(..) => Ok(()),
        }
    }

    fn stage(&mut self, kind: RequestKind, key: Key, write: Option<StoredRecord>) {
        self.staged.writes.insert(key, write);
        self.staged.kind.get_or_insert(kind);
    }

    fn check_unique(&self, kind: RequestKind, key: Key, record: &Record) -> StoreResult<()> {
        let base = self.guard.table();
        for index in base.indexes().iter().filter(|index| index.def().unique) {
            let Some(value) = index.value_of(record) else {
                continue;
            };
            let staged_clash = self.staged.writes.iter().any(|(other, write)| {
                *other != key
                    && write
                        .as_ref()
                        .is_some_and(|stored| index.value_of(&stored.record) == Some(value))
            });
            let committed_clash = !self.staged.cleared
                && index
                    .lookup(value)
                    .into_iter()
                    .any(|other| other != key && !self.staged.writes.contains_key(&other));
            if staged_clash || committed_clash {
                return Err(kind.failure(format!(
                    "unique index `{}` already holds {value:?}",
                    index.def().name
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("table", &self.table())
            .field("mode", &self.mode())
            .field("staged", &self.staged)
            .finish()
    }
}
