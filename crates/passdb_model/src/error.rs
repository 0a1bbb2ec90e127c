//! Error types for tree operations.

use crate::id::{BinaryId, EntryId, GroupId};
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised when a tree operation would break an invariant.
///
/// Every variant is returned *before* any mutation happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The group is not part of the live tree.
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    /// The entry is not part of the live tree.
    #[error("entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Moving a group under itself or one of its descendants.
    #[error("cannot move group {group} under its own descendant {target}")]
    InvalidReparent {
        /// The group being moved.
        group: GroupId,
        /// The requested new parent.
        target: GroupId,
    },

    /// The root group cannot be moved, detached or given a role.
    #[error("operation not permitted on the root group")]
    RootImmutable,

    /// An entry already has a string field with this key.
    #[error("duplicate string field key: {key}")]
    DuplicateField {
        /// The conflicting key.
        key: String,
    },

    /// An index outside the valid range for a child sequence.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// The requested index.
        index: usize,
        /// The length of the sequence.
        len: usize,
    },

    /// A binary reference points at a binary that does not exist.
    #[error("unknown binary reference: {0}")]
    UnknownReference(BinaryId),

    /// An id is already present in the tree.
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    /// A structural inconsistency found while validating a whole tree.
    #[error("inconsistent tree: {0}")]
    Inconsistent(String),
}

impl ModelError {
    /// Creates an inconsistency error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent(message.into())
    }
}
