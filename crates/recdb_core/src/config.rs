//! Store configuration.

use crate::schema::SCHEMA_VERSION;
use std::path::PathBuf;

/// Where the store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Nothing is persisted; the store lives as long as its connection.
    InMemory,
    /// A directory holding the commit log and lock file.
    Directory(PathBuf),
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the data lives.
    pub location: StoreLocation,

    /// Schema version the store is opened at. A store written at a lower
    /// version is upgraded on open; a higher one refuses to open.
    pub schema_version: u32,

    /// Whether every commit is fsynced before it is acknowledged.
    pub sync_on_commit: bool,

    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: StoreLocation::InMemory,
            schema_version: SCHEMA_VERSION,
            sync_on_commit: true,
            create_if_missing: true,
        }
    }
}

impl Config {
    /// Creates a configuration with default values (in-memory).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A store persisted in the directory at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self::default().location(StoreLocation::Directory(path.into()))
    }

    /// Sets the location.
    #[must_use]
    pub fn location(mut self, location: StoreLocation) -> Self {
        self.location = location;
        self
    }

    /// Sets the schema version.
    #[must_use]
    pub const fn schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.location, StoreLocation::InMemory);
        assert_eq!(config.schema_version, SCHEMA_VERSION);
        assert!(config.sync_on_commit);
        assert!(config.create_if_missing);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::at("/tmp/recordings")
            .schema_version(2)
            .sync_on_commit(false)
            .create_if_missing(false);

        assert_eq!(
            config.location,
            StoreLocation::Directory(PathBuf::from("/tmp/recordings"))
        );
        assert_eq!(config.schema_version, 2);
        assert!(!config.sync_on_commit);
        assert!(!config.create_if_missing);
    }
}
