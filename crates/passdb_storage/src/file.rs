//! File-based storage backend for persistent databases.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A file-based storage backend.
///
/// Replacement follows the write-then-rename pattern:
/// 1. Write the new blob to a sibling temporary file
/// 2. Sync the temporary file to disk
/// 3. Rename it over the database file
/// 4. Sync the directory so the rename is durable
///
/// A crash or error before step 3 leaves the previous file untouched.
///
/// # Example
///
/// ```no_run
/// use passdb_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::new(Path::new("vault.kdbx"));
/// backend.replace(b"encrypted").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    read_only: bool,
}

impl FileBackend {
    /// Creates a backend for the file at `path`. The file need not exist.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        let read_only = fs::metadata(path)
            .map(|m| m.permissions().readonly())
            .unwrap_or(false);
        Self {
            path: path.to_path_buf(),
            read_only,
        }
    }

    /// Creates a backend that never writes, even if the file is writable.
    #[must_use]
    pub fn open_read_only(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            read_only: true,
        }
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the sibling temporary file used during replacement.
    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "database".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn sync_directory(&self) -> StorageResult<()> {
        #[cfg(unix)]
        {
            if let Some(parent) = self.path.parent() {
                let dir = if parent.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent
                };
                File::open(dir)?.sync_all()?;
            }
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    location: self.path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly {
                location: self.path.display().to_string(),
            });
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        let written = (|| -> StorageResult<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        self.sync_directory()?;

        debug!(path = %self.path.display(), bytes = data.len(), "replaced database file");
        Ok(())
    }

    fn exists(&self) -> StorageResult<bool> {
        Ok(self.path.is_file())
    }

    fn size(&self) -> StorageResult<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
