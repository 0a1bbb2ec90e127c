//! # passdb model
//!
//! The in-memory representation of one open password database.
//!
//! This crate provides:
//! - [`Tree`]: an arena of [`Group`]s and [`Entry`]s keyed by UUID, with a
//!   single root group and ordered children
//! - Structural invariants: no cycles, unique string field keys, at most
//!   one holder per [`Role`]
//! - [`AttachmentStore`]: deduplicated binary blobs addressed by
//!   [`BinaryId`] and referenced from entries through [`BinaryRef`]s
//!
//! The model has no undo logic and no notion of files or encryption. Every
//! mutating method validates its arguments before touching the tree, so a
//! returned error always means the tree is unchanged.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod attachment;
mod entry;
mod error;
mod field;
mod group;
mod id;
mod meta;
mod times;
mod tree;

pub use attachment::{AttachmentStore, Binary, BinaryRef};
pub use entry::Entry;
pub use error::{ModelError, ModelResult};
pub use field::{StringField, STANDARD_KEYS};
pub use group::{Group, Role};
pub use id::{BinaryId, EntryId, GroupId};
pub use meta::{Compression, DatabaseVersion, FormatVersion, Meta};
pub use times::Times;
pub use tree::{GroupSubtree, ReleaseReport, Tree};

/// Standard field key for the entry title.
pub const TITLE: &str = "Title";
/// Standard field key for the user name.
pub const USER_NAME: &str = "UserName";
/// Standard field key for the password.
pub const PASSWORD: &str = "Password";
/// Standard field key for the URL.
pub const URL: &str = "URL";
/// Standard field key for the notes.
pub const NOTES: &str = "Notes";
