//! # passdb testkit
//!
//! Test utilities for passdb.
//!
//! This crate provides:
//! - Fixtures: fast-to-encrypt documents backed by temporary files
//! - Property-based generators for trees and edit scripts using proptest
//! - Tree outlines for comparing layouts that renumber ids
//!
//! ## Usage
//!
//! ```rust,ignore
//! use passdb_testkit::prelude::*;
//!
//! #[test]
//! fn survives_reopen() {
//!     let fixture = TestDocument::new(DatabaseVersion::V4);
//!     let WorkEmail { email, .. } = work_email(&fixture.doc);
//!     let reopened = fixture.save_and_reopen("pw");
//!     assert!(reopened.find_entry(email).unwrap().is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod outline;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::outline::*;
    pub use passdb_model::DatabaseVersion;
}

pub use fixtures::*;
pub use generators::*;
pub use outline::*;
