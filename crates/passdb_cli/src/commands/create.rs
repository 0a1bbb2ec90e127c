//! Create command implementation.

use passdb_codec::Credentials;
use passdb_core::{Config, Document};
use passdb_model::DatabaseVersion;
use passdb_storage::FileBackend;
use std::path::Path;
use tracing::info;

/// Runs the create command.
pub fn run(
    path: &Path,
    credentials: &Credentials,
    kdb: bool,
    rounds: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!("Refusing to overwrite {:?}", path).into());
    }
    let version = if kdb {
        DatabaseVersion::V3
    } else {
        DatabaseVersion::V4
    };
    let mut config = Config::new().version(version);
    if let Some(rounds) = rounds {
        config = config.transform_rounds(rounds);
    }

    let doc = Document::new(config);
    doc.set_credentials(credentials)?;
    doc.save_to(Box::new(FileBackend::new(path)))?;
    info!(path = %path.display(), %version, "database created");

    println!("Created {} database at {:?}", version, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn created_database_opens_and_verifies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.kdbx");
        let credentials = Credentials::password("pw");
        run(&path, &credentials, false, Some(8)).unwrap();

        let doc = crate::commands::open(&path, &credentials).unwrap();
        assert!(doc.trash_id().unwrap().is_some());
        assert!(doc.with_tree(crate::commands::verify::check).unwrap().errors.is_empty());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("existing.kdb");
        std::fs::write(&path, b"keep").unwrap();
        assert!(run(&path, &Credentials::password("pw"), true, Some(8)).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep");
    }
}
