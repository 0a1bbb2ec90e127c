//! Test fixtures and document helpers.
//!
//! Documents created here use a handful of key transformation rounds so
//! that saving and opening stay fast in tests.

use passdb_codec::Credentials;
use passdb_core::{Config, Document};
use passdb_model::{DatabaseVersion, EntryId, GroupId, PASSWORD, TITLE};
use passdb_storage::FileBackend;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Key transformation rounds used by test documents.
pub const TEST_ROUNDS: u64 = 4;

/// A configuration that encrypts quickly.
pub fn fast_config(version: DatabaseVersion) -> Config {
    Config::new().version(version).transform_rounds(TEST_ROUNDS)
}

/// A fresh document with a temporary file location.
pub struct TestDocument {
    /// The document.
    pub doc: Document,
    /// Where [`save`](Self::save) writes.
    pub path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestDocument {
    /// Creates an empty unlocked document in the given layout.
    pub fn new(version: DatabaseVersion) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join(format!("test.{}", version.extension()));
        Self {
            doc: Document::new(fast_config(version)),
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Sets `password` and saves to the temporary file.
    pub fn save(&self, password: &str) {
        self.doc
            .set_credentials(&Credentials::password(password))
            .expect("Failed to set credentials");
        self.doc
            .save_to(Box::new(FileBackend::new(&self.path)))
            .expect("Failed to save document");
    }

    /// Saves with `password` and opens the file into a new document.
    pub fn save_and_reopen(&self, password: &str) -> Document {
        self.save(password);
        open_file(&self.path, password)
    }

    /// The temporary directory.
    pub fn dir(&self) -> &Path {
        self._temp_dir.path()
    }
}

impl std::ops::Deref for TestDocument {
    type Target = Document;

    fn deref(&self) -> &Self::Target {
        &self.doc
    }
}

/// Opens the file at `path` with `password`.
pub fn open_file(path: &Path, password: &str) -> Document {
    let doc = Document::closed(Config::default());
    doc.open(
        Box::new(FileBackend::new(path)),
        &Credentials::password(password),
    )
    .expect("Failed to open document");
    doc
}

/// Ids created by [`work_email`].
#[derive(Debug, Clone, Copy)]
pub struct WorkEmail {
    /// The "Work" group under the root.
    pub work: GroupId,
    /// The "Email" entry inside "Work".
    pub email: EntryId,
}

/// Adds a "Work" group holding an "Email" entry with password "x".
pub fn work_email(doc: &Document) -> WorkEmail {
    let root = doc.root_id().expect("Document is not unlocked");
    let work = doc.create_group(root).expect("Failed to create group");
    doc.set_group_name(work, "Work")
        .expect("Failed to rename group");
    let email = doc.create_entry(work).expect("Failed to create entry");
    doc.update_string_field(email, TITLE, "Email", false)
        .expect("Failed to set title");
    doc.update_string_field(email, PASSWORD, "x", true)
        .expect("Failed to set password");
    WorkEmail { work, email }
}
