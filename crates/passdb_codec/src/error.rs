//! Error types for the codec crate.

use passdb_model::ModelError;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding or encoding a database.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The password or key file does not open this database.
    ///
    /// Deliberately carries no detail about which part was wrong.
    #[error("wrong password or key file")]
    WrongCredentials,

    /// Neither a password nor a key file was supplied.
    #[error("no password or key file given")]
    MissingCredentials,

    /// The decrypted content is malformed.
    #[error("corrupt database: {reason}")]
    CorruptDatabase {
        /// What was found to be wrong.
        reason: String,
    },

    /// The file uses a signature, version or cipher we cannot read.
    #[error("unsupported format: {reason}")]
    Unsupported {
        /// Description of the unsupported feature.
        reason: String,
    },

    /// The tree cannot be written in the requested layout.
    #[error("encoding failed: {message}")]
    Encoding {
        /// Description of the encoding error.
        message: String,
    },

    /// Reading a key file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Create a corrupt database error.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptDatabase {
            reason: reason.into(),
        }
    }

    /// Create an unsupported format error.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Create an encoding error.
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    /// Returns true for [`CodecError::WrongCredentials`].
    #[must_use]
    pub fn is_wrong_credentials(&self) -> bool {
        matches!(self, Self::WrongCredentials)
    }
}

/// A tree rebuilt from a file that breaks a model invariant is corrupt.
impl From<ModelError> for CodecError {
    fn from(err: ModelError) -> Self {
        Self::corrupt(err.to_string())
    }
}
