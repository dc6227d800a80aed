//! # recdb core
//!
//! An embedded, asynchronous record store with two tables:
//!
//! - **tree**: folder and recording nodes (`name`, `parentKey`, `date`,
//!   optional `dataKey`), indexed by name, by parent and uniquely by date
//! - **data**: opaque payloads, usually audio blobs, referenced by leaf
//!   nodes through `dataKey`
//!
//! Both tables assign their own integer keys. All state lives in one
//! append-only commit log; tables are rebuilt from it on open.
//!
//! ## Layers
//!
//! - [`ConnectionManager`] opens the store once, however many tasks ask
//! - [`Connection::scope`] hands out a [`Scope`]: one table, one mode, one
//!   atomic commit
//! - [`LocalStore`] implements create / read / update / delete / clear on
//!   top, generic over [`TableName`] and with typed tree helpers
//!
//! Every operation is an `async fn` that resolves once, to a value or to a
//! [`StoreError`].
//!
//! ## Example
//!
//! ```rust
//! use recdb_core::{Config, ConnectionManager, LocalStore, Record, TableName};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> recdb_core::StoreResult<()> {
//! let store = LocalStore::new(Arc::new(ConnectionManager::new(Config::in_memory())?));
//!
//! let key = store
//!     .create(TableName::Tree, Record::new().with("name", "A").with("parentKey", 0).with("date", 100))
//!     .await?;
//! store.update(TableName::Tree, key, Record::new().with("name", "B")).await?;
//!
//! let node = store.read_tree_node(key).await?.expect("just created");
//! assert_eq!((node.name.as_str(), node.date), ("B", 100));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod dir;
pub mod error;
pub mod index;
pub mod log;
pub mod manager;
pub mod node;
pub mod record;
pub mod request;
pub mod schema;
pub mod scope;
pub mod store;
pub mod table;
pub mod types;
pub mod value;

pub use config::{Config, StoreLocation};
pub use connection::Connection;
pub use error::{StoreError, StoreResult};
pub use manager::ConnectionManager;
pub use node::{DataRecord, NewTreeNode, TreeNode, TreeNodePatch};
pub use record::{merge_update, normalize, Payload, Record, StoredRecord};
pub use request::{Request, RequestKind};
pub use schema::SCHEMA_VERSION;
pub use scope::Scope;
pub use store::LocalStore;
pub use types::{is_valid_key, validate_key, Key, Mode, RawKey, TableName, MAX_KEY, NO_KEY};
pub use value::Value;
