//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No blob has been stored yet.
    #[error("nothing stored at {location}")]
    NotFound {
        /// Human readable location of the missing blob.
        location: String,
    },

    /// The backend refuses writes.
    #[error("storage is read-only: {location}")]
    ReadOnly {
        /// Human readable location of the blob.
        location: String,
    },
}
