//! # recdb storage
//!
//! The append/seek byte store that sits underneath a recdb commit log.
//!
//! A backend knows nothing about tables, records or log framing. It offers
//! exactly what an append-only log needs:
//!
//! - append bytes at the end and learn the offset they landed at
//! - read an exact byte range back
//! - flush / sync for durability
//! - truncate, used to cut off a torn final log entry after a crash
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests
//! - [`FileBackend`] - a single file on the local file system
//!
//! ## Example
//!
//! ```rust
//! use recdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"take 1").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"take 1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
