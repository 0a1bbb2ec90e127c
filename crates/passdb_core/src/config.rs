//! Document configuration.

use passdb_model::{Compression, DatabaseVersion};

/// Default number of AES key transformation rounds for new databases.
pub const DEFAULT_TRANSFORM_ROUNDS: u64 = 60_000;

/// Default name of the trash group created for KDBX databases.
pub const DEFAULT_TRASH_NAME: &str = "Recycle Bin";

/// Configuration for creating or opening a document.
#[derive(Debug, Clone)]
pub struct Config {
    /// Layout of databases created with [`Document::new`](crate::Document::new).
    pub version: DatabaseVersion,

    /// Key transformation rounds for new databases.
    pub transform_rounds: u64,

    /// Payload compression for new KDBX databases.
    pub compression: Compression,

    /// Maximum number of undoable actions kept (0 = unlimited).
    pub undo_depth: usize,

    /// Name given to a trash group created on demand in KDBX databases.
    /// KDB databases always use `Backup`.
    pub trash_name: String,

    /// Whether the document refuses mutations and saves.
    pub read_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: DatabaseVersion::V4,
            transform_rounds: DEFAULT_TRANSFORM_ROUNDS,
            compression: Compression::Gzip,
            undo_depth: 0, // unlimited
            trash_name: DEFAULT_TRASH_NAME.to_string(),
            read_only: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the layout of new databases.
    #[must_use]
    pub const fn version(mut self, version: DatabaseVersion) -> Self {
        self.version = version;
        self
    }

    /// Sets the key transformation rounds for new databases.
    #[must_use]
    pub const fn transform_rounds(mut self, rounds: u64) -> Self {
        self.transform_rounds = rounds;
        self
    }

    /// Sets the payload compression for new databases.
    #[must_use]
    pub const fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the undo depth limit.
    #[must_use]
    pub const fn undo_depth(mut self, depth: usize) -> Self {
        self.undo_depth = depth;
        self
    }

    /// Sets the name of trash groups created on demand.
    #[must_use]
    pub fn trash_name(mut self, name: impl Into<String>) -> Self {
        self.trash_name = name.into();
        self
    }

    /// Sets whether the document is read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.version, DatabaseVersion::V4);
        assert_eq!(config.transform_rounds, 60_000);
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.undo_depth, 0);
        assert_eq!(config.trash_name, "Recycle Bin");
        assert!(!config.read_only);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .version(DatabaseVersion::V3)
            .transform_rounds(10)
            .undo_depth(5)
            .trash_name("Bin")
            .read_only(true);

        assert_eq!(config.version, DatabaseVersion::V3);
        assert_eq!(config.transform_rounds, 10);
        assert_eq!(config.undo_depth, 5);
        assert_eq!(config.trash_name, "Bin");
        assert!(config.read_only);
    }
}
