//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same underlying blob, so a test can keep one handle
/// while a document owns another and observe what gets written.
///
/// # Example
///
/// ```rust
/// use passdb_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.replace(b"blob").unwrap();
/// assert_eq!(observer.data(), Some(b"blob".to_vec()));
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Option<Vec<u8>>>>,
    read_only: bool,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding an existing blob.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(Some(data))),
            read_only: false,
        }
    }

    /// Returns a read-only handle to the same blob.
    #[must_use]
    pub fn read_only(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            read_only: true,
        }
    }

    /// Returns a copy of the stored blob.
    #[must_use]
    pub fn data(&self) -> Option<Vec<u8>> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        self.data.read().clone().ok_or_else(|| StorageError::NotFound {
            location: "memory".to_string(),
        })
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly {
                location: "memory".to_string(),
            });
        }
        *self.data.write() = Some(data.to_vec());
        Ok(())
    }

    fn exists(&self) -> StorageResult<bool> {
        Ok(self.data.read().is_some())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().as_ref().map_or(0, |d| d.len() as u64))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
