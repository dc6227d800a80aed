//! Schema definition and the catalog of open tables.
//!
//! | Table | Key path | Keys | Indexes |
//! |---|---|---|---|
//! | `tree` | `id` | generated | `name`, `parentKey`, `date` (unique) |
//! | `data` | `id` | generated | none |

use crate::index::IndexDef;
use crate::log::LogEntry;
use crate::node::{DATE_FIELD, NAME_FIELD, PARENT_KEY_FIELD};
use crate::record::ID_FIELD;
use crate::table::Table;
use crate::types::TableName;
use std::collections::BTreeMap;
use thiserror::Error;

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Definition of a table and its indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: TableName,
    /// Record field holding the key.
    pub key_path: String,
    /// Whether keys are generated on insert.
    pub auto_increment: bool,
    /// Secondary indexes.
    pub indexes: Vec<IndexDef>,
}

/// The two tables of the store, data first.
#[must_use]
pub fn store_schema() -> Vec<TableDef> {
    vec![
        TableDef {
            name: TableName::Data,
            key_path: ID_FIELD.to_string(),
            auto_increment: true,
            indexes: Vec::new(),
        },
        TableDef {
            name: TableName::Tree,
            key_path: ID_FIELD.to_string(),
            auto_increment: true,
            indexes: vec![
                IndexDef::on(NAME_FIELD),
                IndexDef::on(PARENT_KEY_FIELD),
                IndexDef::on(DATE_FIELD).unique(),
            ],
        },
    ]
}

/// Schema-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The table is already in the catalog.
    #[error("table `{0}` already exists")]
    TableExists(TableName),

    /// The table already has an index by that name.
    #[error("index `{name}` already exists on table `{table}`")]
    IndexExists {
        /// Owning table.
        table: TableName,
        /// Index name.
        name: String,
    },

    /// The table is not in the catalog.
    #[error("table `{0}` does not exist")]
    UnknownTable(TableName),

    /// The definition cannot be applied.
    #[error("invalid schema definition: {0}")]
    InvalidDefinition(String),
}

/// Tables known to a connection, plus the schema version in effect.
#[derive(Debug, Default)]
pub struct Catalog {
    version: Option<u32>,
    tables: BTreeMap<TableName, Table>,
}

impl Catalog {
    /// An empty catalog (no schema yet).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorded schema version, or `None` before the first open.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// The table called `name`.
    #[must_use]
    pub fn table(&self, name: TableName) -> Option<&Table> {
        self.tables.get(&name)
    }

    /// Removes and returns the table called `name`.
    pub fn take(&mut self, name: TableName) -> Option<Table> {
        self.tables.remove(&name)
    }

    /// Applies one log entry.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the entry contradicts the catalog.
    pub fn apply(&mut self, entry: &LogEntry) -> Result<(), SchemaError> {
        match entry {
            LogEntry::SchemaVersion { version } => {
                self.version = Some(*version);
            }
            LogEntry::CreateTable {
                name,
                key_path,
                auto_increment,
            } => {
                if self.tables.contains_key(name) {
                    return Err(SchemaError::TableExists(*name));
                }
                self.tables
                    .insert(*name, Table::new(*name, key_path.clone(), *auto_increment));
            }
            LogEntry::CreateIndex {
                table,
                name,
                field,
                unique,
            } => {
                let target = self
                    .tables
                    .get_mut(table)
                    .ok_or(SchemaError::UnknownTable(*table))?;
                if target.index(name).is_some() {
                    return Err(SchemaError::IndexExists {
                        table: *table,
                        name: name.clone(),
                    });
                }
                target.add_index(IndexDef {
                    name: name.clone(),
                    field: field.clone(),
                    unique: *unique,
                });
            }
            LogEntry::Commit { table, next_id, ops } => {
                let target = self
                    .tables
                    .get_mut(table)
                    .ok_or(SchemaError::UnknownTable(*table))?;
                for op in ops {
                    target.apply(op);
                }
                target.advance_next_id(*next_id);
            }
        }
        Ok(())
    }

    /// Creates a table from its definition and returns the log entries that
    /// record it.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::TableExists`] if the table is already present,
    /// or another [`SchemaError`] if the definition is invalid.
    pub fn create_table(&mut self, def: &TableDef) -> Result<Vec<LogEntry>, SchemaError> {
        if def.key_path.is_empty() {
            return Err(SchemaError::InvalidDefinition(format!(
                "table `{}` has an empty key path",
                def.name
            )));
        }
        if self.tables.contains_key(&def.name) {
            return Err(SchemaError::TableExists(def.name));
        }

        let mut entries = vec![LogEntry::CreateTable {
            name: def.name,
            key_path: def.key_path.clone(),
            auto_increment: def.auto_increment,
        }];
        entries.extend(def.indexes.iter().map(|index| LogEntry::CreateIndex {
            table: def.name,
            name: index.name.clone(),
            field: index.field.clone(),
            unique: index.unique,
        }));

        // Apply to a scratch copy first so a bad index leaves the catalog untouched.
        let mut scratch = Catalog::new();
        for entry in &entries {
            scratch.apply(entry)?;
        }
        for entry in &entries {
            self.apply(entry)?;
        }
        Ok(entries)
    }

    /// Brings the catalog to `target` and returns the entries to persist.
    ///
    /// With no recorded version every table is created. With a lower one,
    /// creation is re-run and tables that already exist are skipped along with
    /// their indexes. A matching version needs no entries. The caller rejects
    /// a stored version newer than `target` before calling this.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] other than
    /// [`SchemaError::TableExists`].
    pub fn upgrade(
        &mut self,
        target: u32,
        defs: &[TableDef],
    ) -> Result<Vec<LogEntry>, SchemaError> {
        if self.version.is_some_and(|version| version >= target) {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for def in defs {
            match self.create_table(def) {
                Ok(created) => {
                    tracing::debug!(table = %def.name, "created table");
                    entries.extend(created);
                }
                Err(SchemaError::TableExists(name)) => {
                    tracing::debug!(table = %name, "table already exists");
                }
                Err(e) => return Err(e),
            }
        }

        let bump = LogEntry::SchemaVersion { version: target };
        self.apply(&bump)?;
        entries.push(bump);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogOp;

    #[test]
    fn first_upgrade_creates_everything() {
        let mut catalog = Catalog::new();
        let entries = catalog.upgrade(SCHEMA_VERSION, &store_schema()).unwrap();

        assert_eq!(entries.len(), 2 + 3 + 1);
        assert_eq!(catalog.version(), Some(SCHEMA_VERSION));
        let tree = catalog.table(TableName::Tree).unwrap();
        assert_eq!(tree.indexes().len(), 3);
        assert!(tree.index(DATE_FIELD).unwrap().def().unique);
        assert!(catalog.table(TableName::Data).unwrap().indexes().is_empty());
    }

    #[test]
    fn same_version_is_a_no_op() {
        let mut catalog = Catalog::new();
        catalog.upgrade(1, &store_schema()).unwrap();
        assert!(catalog.upgrade(1, &store_schema()).unwrap().is_empty());
    }

    #[test]
    fn bump_swallows_existing_tables() {
        let mut catalog = Catalog::new();
        catalog.upgrade(1, &store_schema()).unwrap();

        let entries = catalog.upgrade(2, &store_schema()).unwrap();
        assert_eq!(entries, vec![LogEntry::SchemaVersion { version: 2 }]);
        assert_eq!(catalog.version(), Some(2));
    }

    #[test]
    fn invalid_definition_is_not_swallowed() {
        let mut defs = store_schema();
        defs[0].key_path.clear();
        assert!(matches!(
            Catalog::new().upgrade(1, &defs),
            Err(SchemaError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn duplicate_index_leaves_catalog_untouched() {
        let mut defs = store_schema();
        defs[1].indexes.push(IndexDef::on(NAME_FIELD));

        let mut catalog = Catalog::new();
        let err = catalog.create_table(&defs[1]).unwrap_err();
        assert!(matches!(err, SchemaError::IndexExists { .. }));
        assert!(catalog.table(TableName::Tree).is_none());
    }

    #[test]
    fn commit_for_unknown_table_is_rejected() {
        let mut catalog = Catalog::new();
        let entry = LogEntry::Commit {
            table: TableName::Data,
            next_id: 3,
            ops: vec![LogOp::Clear],
        };
        assert_eq!(
            catalog.apply(&entry),
            Err(SchemaError::UnknownTable(TableName::Data))
        );
    }
}
