//! Storage backend trait definition.

use crate::error::StorageResult;

/// A whole-blob storage backend.
///
/// Backends hold exactly one blob: the encrypted database file. The engine
/// reads it completely on open and replaces it completely on save.
///
/// # Invariants
///
/// - `read_all` returns exactly the bytes of the last successful `replace`
/// - `replace` is atomic: after a failure the previous blob is still intact
/// - Backends must be `Send + Sync` so a save can run on a worker thread
pub trait StorageBackend: Send + Sync {
    /// Reads the complete stored blob.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`](crate::StorageError::NotFound) if
    /// nothing has been stored yet, or an I/O error.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Atomically replaces the stored blob with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. The previous blob must be left
    /// untouched in that case.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Returns true if a blob has been stored.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self) -> StorageResult<bool>;

    /// Returns the size of the stored blob in bytes (0 if none).
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Returns true if the backend refuses writes.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Short description used in log lines.
    fn describe(&self) -> String;
}
