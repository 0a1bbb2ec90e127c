//! Error types for the document engine.

use passdb_model::DatabaseVersion;
use thiserror::Error;

/// Result type for document operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in document operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] passdb_storage::StorageError),

    /// Encoding, decoding or key derivation failed.
    #[error("codec error: {0}")]
    Codec(#[from] passdb_codec::CodecError),

    /// A mutation would break a tree invariant. The tree is unchanged.
    #[error("{0}")]
    Model(#[from] passdb_model::ModelError),

    /// I/O error outside a storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is locked; its content is hidden until unlocked.
    #[error("document is locked")]
    Locked,

    /// No database is open.
    #[error("document is closed")]
    Closed,

    /// A database is being decrypted.
    #[error("document is being decrypted")]
    Busy,

    /// The document or its backend refuses writes.
    #[error("document is read-only")]
    ReadOnly,

    /// Another mutation is in progress.
    #[error("another mutation is in progress")]
    ConcurrentMutation,

    /// The operation is not available in this database layout.
    #[error("{feature} is not supported by {version} databases")]
    UnsupportedByVersion {
        /// What was attempted.
        feature: String,
        /// Layout of the document.
        version: DatabaseVersion,
    },

    /// An item does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing item.
        what: String,
    },

    /// The undo or redo stack is empty.
    #[error("nothing to {action}")]
    NothingToUndo {
        /// `undo` or `redo`.
        action: &'static str,
    },

    /// A background operation was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation needs credentials the document does not have.
    #[error("no password or key file set")]
    MissingCredentials,

    /// No storage backend is attached to the document.
    #[error("document has no storage location")]
    NoBackend,
}

impl CoreError {
    /// Creates an unsupported-by-version error.
    pub fn unsupported(feature: impl Into<String>, version: DatabaseVersion) -> Self {
        Self::UnsupportedByVersion {
            feature: feature.into(),
            version,
        }
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Returns true if the error means the credentials did not open the
    /// database.
    #[must_use]
    pub fn is_wrong_credentials(&self) -> bool {
        matches!(self, Self::Codec(e) if e.is_wrong_credentials())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passdb_codec::CodecError;
    use passdb_model::{GroupId, ModelError};

    #[test]
    fn wraps_lower_layers() {
        let err: CoreError = CodecError::WrongCredentials.into();
        assert!(err.is_wrong_credentials());

        let err: CoreError = ModelError::GroupNotFound(GroupId::from_bytes([0; 16])).into();
        assert!(matches!(err, CoreError::Model(ModelError::GroupNotFound(_))));
        assert!(!err.is_wrong_credentials());
    }

    #[test]
    fn display_names_the_layout() {
        let err = CoreError::unsupported("custom string fields", DatabaseVersion::V3);
        assert_eq!(err.to_string(), "custom string fields is not supported by KDB databases");
    }
}
