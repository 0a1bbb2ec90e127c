//! CLI command implementations.

pub mod create;
pub mod empty_trash;
pub mod export;
pub mod inspect;
pub mod verify;

use passdb_codec::Credentials;
use passdb_core::{Config, Document};
use passdb_storage::FileBackend;
use std::path::Path;

/// Opens the database at `path`, failing early if it does not exist.
pub(crate) fn open(
    path: &Path,
    credentials: &Credentials,
) -> Result<Document, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }
    if credentials.is_empty() {
        return Err("A password or key file is required".into());
    }
    let doc = Document::closed(Config::default());
    doc.open(Box::new(FileBackend::new(path)), credentials)?;
    Ok(doc)
}
