//! # passdb codec
//!
//! Reads and writes the two KeePass file layouts.
//!
//! This crate provides:
//! - [`Credentials`] and [`CompositeKey`]: password/key-file handling and
//!   the AES key transformation
//! - KDB (KeePass 1.x) and KDBX 3.1 (KeePass 2.x) decoding and encoding
//! - [`export_xml`]: a plain-text XML dump of any tree
//!
//! ## Guarantees
//!
//! - Decoding is all-or-nothing: a tree is returned only if the whole file
//!   was read and every invariant holds.
//! - `decode(encode(tree)) == tree` up to the normalisations documented on
//!   each layout; ordering of groups, entries and fields is preserved.
//! - A wrong key is reported as [`CodecError::WrongCredentials`] without
//!   saying which part of the credentials was wrong.
//!
//! ## Usage
//!
//! ```no_run
//! use passdb_codec::{decode_with, encode, Credentials};
//!
//! let bytes = std::fs::read("vault.kdbx")?;
//! let credentials = Credentials::password("correct horse");
//! let tree = decode_with(&bytes, &credentials)?;
//! let key = credentials.composite_key(tree.version())?;
//! let saved = encode(&tree, &key)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cipher;
mod error;
pub mod kdb;
mod kdbx;
mod key;
mod reader;

pub use error::{CodecError, CodecResult};
pub use kdbx::SIGNATURE_2 as KDBX_SIGNATURE_2;
pub use key::{key_file_key, CompositeKey, Credentials, KEY_SIZE};

use passdb_model::{Compression, DatabaseVersion, FormatVersion, Tree};
use reader::ByteReader;

/// Header facts readable without credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    /// Which layout the file uses.
    pub version: DatabaseVersion,
    /// File version from the header.
    pub format: FormatVersion,
    /// Key transformation rounds.
    pub transform_rounds: u64,
    /// Payload compression (always `None` for KDB).
    pub compression: Compression,
}

/// Identifies the layout from the file signatures.
///
/// # Errors
///
/// Returns [`CodecError::Unsupported`] for unknown signatures and
/// [`CodecError::CorruptDatabase`] for files too short to carry them.
pub fn detect_version(data: &[u8]) -> CodecResult<DatabaseVersion> {
    let mut reader = ByteReader::new(data);
    let sig1 = reader.read_u32()?;
    let sig2 = reader.read_u32()?;
    match (sig1, sig2) {
        (kdb::SIGNATURE_1, kdb::SIGNATURE_2) => Ok(DatabaseVersion::V3),
        (kdb::SIGNATURE_1, kdbx::SIGNATURE_2) => Ok(DatabaseVersion::V4),
        _ => Err(CodecError::unsupported(format!(
            "unknown file signature {sig1:#010x} {sig2:#010x}"
        ))),
    }
}

/// Reads the unencrypted header.
///
/// # Errors
///
/// Fails for unknown or malformed headers.
pub fn read_header(data: &[u8]) -> CodecResult<HeaderInfo> {
    match detect_version(data)? {
        DatabaseVersion::V3 => {
            let (format, rounds) = kdb::read_info(data)?;
            Ok(HeaderInfo {
                version: DatabaseVersion::V3,
                format,
                transform_rounds: rounds,
                compression: Compression::None,
            })
        }
        DatabaseVersion::V4 => {
            let (format, rounds, compression) = kdbx::read_info(data)?;
            Ok(HeaderInfo {
                version: DatabaseVersion::V4,
                format,
                transform_rounds: rounds,
                compression,
            })
        }
    }
}

/// Decrypts and parses a database.
///
/// # Errors
///
/// - [`CodecError::WrongCredentials`] if the key does not open the file
/// - [`CodecError::CorruptDatabase`] if the decrypted content is malformed
/// - [`CodecError::Unsupported`] if the layout, version or cipher is unknown,
///   or the key was derived for the other layout
pub fn decode(data: &[u8], key: &CompositeKey) -> CodecResult<Tree> {
    let version = detect_version(data)?;
    if key.version() != version {
        return Err(CodecError::unsupported(format!(
            "key derived for {} used on a {version} file",
            key.version()
        )));
    }
    match version {
        DatabaseVersion::V3 => kdb::decode(data, key),
        DatabaseVersion::V4 => kdbx::decode(data, key),
    }
}

/// Detects the layout, derives the matching key and decodes.
///
/// # Errors
///
/// As [`decode`], plus [`CodecError::MissingCredentials`].
pub fn decode_with(data: &[u8], credentials: &Credentials) -> CodecResult<Tree> {
    let key = credentials.composite_key(detect_version(data)?)?;
    decode(data, &key)
}

/// Serialises and encrypts a tree in its own layout.
///
/// # Errors
///
/// Returns [`CodecError::Encoding`] if the tree cannot be represented in
/// its layout, or [`CodecError::Unsupported`] if the key was derived for
/// the other layout.
pub fn encode(tree: &Tree, key: &CompositeKey) -> CodecResult<Vec<u8>> {
    if key.version() != tree.version() {
        return Err(CodecError::unsupported(format!(
            "key derived for {} used on a {} tree",
            key.version(),
            tree.version()
        )));
    }
    match tree.version() {
        DatabaseVersion::V3 => kdb::encode(tree, key),
        DatabaseVersion::V4 => kdbx::encode(tree, key),
    }
}

/// Renders the tree as a KDBX-style XML document with every value in plain
/// text. Works for both layouts; there is no way back.
///
/// # Errors
///
/// Returns [`CodecError::Encoding`] if writing fails.
pub fn export_xml(tree: &Tree) -> CodecResult<String> {
    let bytes = kdbx::xml::write_document(tree, None, kdbx::xml::Protection::Plain)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use passdb_model::{Entry, EntryId, Group, GroupId, StringField, PASSWORD};

    fn tree(version: DatabaseVersion) -> Tree {
        let mut tree = Tree::new(version, "Root");
        tree.meta_mut().transform_rounds = 8;
        let root = tree.root_id();
        let group = tree.add_group(root, Group::new(GroupId::new(), "Email")).unwrap();
        tree.add_entry(
            group,
            Entry::with_standard_fields(EntryId::new())
                .with_field(StringField::new("Hidden", "x", true)),
        )
        .unwrap();
        tree
    }

    #[test]
    fn detects_both_layouts() {
        for version in [DatabaseVersion::V3, DatabaseVersion::V4] {
            let creds = Credentials::password("pw");
            let bytes = encode(&tree(version), &creds.composite_key(version).unwrap()).unwrap();
            assert_eq!(detect_version(&bytes).unwrap(), version);
            let info = read_header(&bytes).unwrap();
            assert_eq!(info.version, version);
            assert_eq!(info.transform_rounds, 8);
            assert_eq!(info.format, version.file_version());
        }
    }

    #[test]
    fn unknown_signature() {
        assert!(matches!(
            detect_version(&[0u8; 16]),
            Err(CodecError::Unsupported { .. })
        ));
        assert!(matches!(
            detect_version(&[0u8; 3]),
            Err(CodecError::CorruptDatabase { .. })
        ));
    }

    #[test]
    fn key_for_other_layout_is_refused() {
        let creds = Credentials::password("pw");
        let bytes = encode(&tree(DatabaseVersion::V4), &creds.composite_key(DatabaseVersion::V4).unwrap())
            .unwrap();
        let v3_key = creds.composite_key(DatabaseVersion::V3).unwrap();
        assert!(decode(&bytes, &v3_key).is_err());
        assert!(decode_with(&bytes, &creds).is_ok());
    }

    #[test]
    fn export_is_plain_text() {
        let mut tree = tree(DatabaseVersion::V4);
        let group = tree.walk_groups()[1].id();
        tree.add_entry(
            group,
            Entry::new(EntryId::new()).with_field(StringField::new(PASSWORD, "open sesame", true)),
        )
        .unwrap();

        let xml = export_xml(&tree).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<Value ProtectInMemory=\"True\">open sesame</Value>"));
        assert!(!xml.contains("Protected=\"True\""));
        assert!(!xml.contains("HeaderHash"));
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn garbage_after_signature_never_panics(
                body in prop::collection::vec(any::<u8>(), 0..512),
                kdbx in any::<bool>(),
            ) {
                let (version, sig2) = if kdbx {
                    (DatabaseVersion::V4, KDBX_SIGNATURE_2)
                } else {
                    (DatabaseVersion::V3, kdb::SIGNATURE_2)
                };
                let mut data = kdb::SIGNATURE_1.to_le_bytes().to_vec();
                data.extend_from_slice(&sig2.to_le_bytes());
                data.extend_from_slice(&body);

                let key = Credentials::password("pw").composite_key(version).unwrap();
                prop_assert!(decode(&data, &key).is_err());
            }
        }
    }
}
