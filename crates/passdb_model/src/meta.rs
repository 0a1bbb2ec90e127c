//! Database-wide metadata.

use std::fmt;

/// The two supported on-disk layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseVersion {
    /// KeePass 1.x `.kdb` layout: fixed header, binary records, one
    /// attachment per entry, no protected fields.
    V3,
    /// KeePass 2.x `.kdbx` (3.1) layout: TLV header, gzip, XML payload,
    /// shared binary pool, protected fields.
    V4,
}

impl DatabaseVersion {
    /// Returns true if string fields carry a persisted protection flag
    /// and entries may hold custom fields.
    #[must_use]
    pub const fn supports_custom_fields(self) -> bool {
        matches!(self, Self::V4)
    }

    /// Returns true if the layout persists a template group.
    #[must_use]
    pub const fn supports_templates(self) -> bool {
        matches!(self, Self::V4)
    }

    /// Maximum number of attachments an entry can hold, if limited.
    #[must_use]
    pub const fn attachment_limit(self) -> Option<usize> {
        match self {
            Self::V3 => Some(1),
            Self::V4 => None,
        }
    }

    /// The file format version written for this layout.
    #[must_use]
    pub const fn file_version(self) -> FormatVersion {
        match self {
            Self::V3 => FormatVersion::new(3, 4),
            Self::V4 => FormatVersion::new(3, 1),
        }
    }

    /// Conventional file extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::V3 => "kdb",
            Self::V4 => "kdbx",
        }
    }
}

impl fmt::Display for DatabaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V3 => write!(f, "KDB"),
            Self::V4 => write!(f, "KDBX"),
        }
    }
}

/// Major/minor version as found in a file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion {
    /// Major version.
    pub major: u16,
    /// Minor version.
    pub minor: u16,
}

impl FormatVersion {
    /// Creates a format version.
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Packs into the `major << 16 | minor` form used by both headers.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        ((self.major as u32) << 16) | self.minor as u32
    }

    /// Unpacks the `major << 16 | minor` header form.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_u32(raw: u32) -> Self {
        Self::new((raw >> 16) as u16, (raw & 0xFFFF) as u16)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Payload compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Payload stored as-is.
    None,
    /// Payload gzip-compressed.
    Gzip,
}

/// Database settings persisted alongside the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Display name of the database (V4 only).
    pub database_name: String,
    /// Name of the program that last wrote the file (V4 only).
    pub generator: String,
    /// Number of AES key transformation rounds.
    pub transform_rounds: u64,
    /// Payload compression (V4 only).
    pub compression: Compression,
    /// Whether deletes go to the trash group (V4 only).
    pub recycle_bin_enabled: bool,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            database_name: String::new(),
            generator: "passdb".to_string(),
            transform_rounds: 60_000,
            compression: Compression::Gzip,
            recycle_bin_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_version_packing() {
        let v = FormatVersion::from_u32(0x0003_0004);
        assert_eq!(v, FormatVersion::new(3, 4));
        assert_eq!(v.to_u32(), 0x0003_0004);
        assert_eq!(v.to_string(), "3.4");
    }

    #[test]
    fn version_capabilities() {
        assert!(!DatabaseVersion::V3.supports_custom_fields());
        assert!(DatabaseVersion::V4.supports_custom_fields());
        assert_eq!(DatabaseVersion::V3.attachment_limit(), Some(1));
        assert_eq!(DatabaseVersion::V4.attachment_limit(), None);
    }
}
