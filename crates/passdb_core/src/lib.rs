//! # passdb core
//!
//! The document engine of passdb.
//!
//! This crate provides:
//! - [`Document`]: one open database with its lifecycle, credentials and
//!   persistence
//! - Reversible [`Operation`]s grouped into [`Batch`]es, recorded in an
//!   [`UndoHistory`]
//! - [`ChangeEvent`] notifications to callbacks and channel subscribers
//! - A non-reentrant [`MutationGuard`] enforcing a single writer
//! - [`Background`] handles for opening and saving on a worker thread
//!
//! Decoding and encoding live in `passdb_codec`, the tree itself in
//! `passdb_model`, and byte storage in `passdb_storage`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod background;
mod config;
mod document;
mod error;
mod events;
mod guard;
mod history;
mod operation;
mod verifier;

pub use background::Background;
pub use config::{Config, DEFAULT_TRANSFORM_ROUNDS, DEFAULT_TRASH_NAME};
pub use document::{Document, DocumentState, Item, NEW_ENTRY_TITLE, NEW_FIELD_KEY, NEW_GROUP_NAME};
pub use error::{CoreError, CoreResult};
pub use events::{ChangeEvent, ListenerId, Listeners};
pub use guard::{MutationGuard, MutationToken};
pub use history::{Action, UndoHistory};
pub use operation::{Batch, Operation};
