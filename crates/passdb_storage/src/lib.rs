//! # passdb storage
//!
//! Storage backends for passdb database files.
//!
//! A database file is a single encrypted blob. Backends are **opaque blob
//! stores**: they never interpret the bytes, they only load the current
//! blob and replace it as a whole.
//!
//! ## Design Principles
//!
//! - A replace either fully succeeds or leaves the previous blob untouched
//! - No knowledge of the KDB/KDBX formats
//! - Must be `Send + Sync` so saves can run on a worker thread
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and scratch documents
//! - [`FileBackend`] - Temp-file + rename replacement on the local file system
//!
//! ## Example
//!
//! ```rust
//! use passdb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! backend.replace(b"encrypted blob").unwrap();
//! assert_eq!(backend.read_all().unwrap(), b"encrypted blob");
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
