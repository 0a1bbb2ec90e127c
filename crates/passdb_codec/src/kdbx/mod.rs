//! KeePass 2.x (`.kdbx`, file version 3.1) layout.
//!
//! ## File layout
//!
//! ```text
//! +--------------------------+
//! | Signatures, version      |
//! | TLV header fields        |  cipher, seeds, rounds, IV, stream keys
//! +--------------------------+
//! | AES-256-CBC payload      |
//! |   stream start bytes     |  32 bytes, checks the key
//! |   hashed block stream    |
//! |     [gzip] XML document  |
//! +--------------------------+
//! ```
//!
//! Protected string values inside the XML are XORed with a Salsa20
//! keystream and base64-encoded, in document order.

mod blocks;
mod header;
mod stream;
pub(crate) mod xml;

pub use header::SIGNATURE_2;

use crate::cipher;
use crate::error::{CodecError, CodecResult};
use crate::key::CompositeKey;
use header::KdbxHeader;
use passdb_model::{Compression, FormatVersion, Tree};
use sha2::{Digest, Sha256};
use stream::InnerStream;
use tracing::{debug, info};
use xml::Protection;
use zeroize::Zeroizing;

/// Header fields readable without a key.
pub(crate) fn read_info(data: &[u8]) -> CodecResult<(FormatVersion, u64, Compression)> {
    let (header, _) = KdbxHeader::read(data)?;
    Ok((header.version, header.rounds, header.compression))
}

/// Decrypts and parses a KDBX file.
pub(crate) fn decode(data: &[u8], key: &CompositeKey) -> CodecResult<Tree> {
    let (header, header_len) = KdbxHeader::read(data)?;
    debug!(
        version = %header.version,
        rounds = header.rounds,
        compression = ?header.compression,
        "decrypting KDBX payload"
    );

    let master = key.master_key(&header.master_seed, &header.transform_seed, header.rounds);
    let plain = Zeroizing::new(cipher::decrypt(&master, &header.iv, &data[header_len..])?);
    if plain.len() < header.stream_start.len() || plain[..32] != header.stream_start {
        return Err(CodecError::WrongCredentials);
    }

    let payload = Zeroizing::new(blocks::read_blocks(&plain[32..])?);
    let document = match header.compression {
        Compression::Gzip => Zeroizing::new(xml::gunzip(&payload)?),
        Compression::None => payload,
    };
    let text = std::str::from_utf8(&document)
        .map_err(|e| CodecError::corrupt(format!("xml payload is not UTF-8: {e}")))?;

    let mut inner = InnerStream::new(&header.protected_stream_key);
    let parsed = xml::parse(text, &mut inner)?;
    let header_hash: [u8; 32] = Sha256::digest(&data[..header_len]).into();
    let mut tree = xml::build_tree(&parsed, &header_hash)?;

    tree.set_format(header.version);
    tree.meta_mut().transform_rounds = header.rounds;
    tree.meta_mut().compression = header.compression;
    tree.validate()?;
    info!(
        groups = tree.group_count(),
        entries = tree.entry_count(),
        binaries = tree.attachments().len(),
        "KDBX database decoded"
    );
    Ok(tree)
}

/// Serialises and encrypts a tree as a KDBX file.
pub(crate) fn encode(tree: &Tree, key: &CompositeKey) -> CodecResult<Vec<u8>> {
    let header = KdbxHeader::generate(tree);
    let header_bytes = header.write();
    let header_hash: [u8; 32] = Sha256::digest(&header_bytes).into();

    let mut inner = InnerStream::new(&header.protected_stream_key);
    let document = xml::write_document(tree, Some(&header_hash), Protection::Stream(&mut inner))?;
    let payload = match header.compression {
        Compression::Gzip => Zeroizing::new(xml::gzip(&document)?),
        Compression::None => document,
    };

    let mut plain = Zeroizing::new(Vec::with_capacity(payload.len() + 128));
    plain.extend_from_slice(&header.stream_start);
    plain.extend_from_slice(&blocks::write_blocks(&payload));

    let master = key.master_key(&header.master_seed, &header.transform_seed, header.rounds);
    let mut out = header_bytes;
    out.extend_from_slice(&cipher::encrypt(&master, &header.iv, &plain));
    debug!(bytes = out.len(), "KDBX database encoded");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Credentials;
    use passdb_model::{DatabaseVersion, Entry, EntryId, Group, GroupId, Role, StringField, PASSWORD};

    fn key(password: &str) -> CompositeKey {
        Credentials::password(password)
            .composite_key(DatabaseVersion::V4)
            .unwrap()
    }

    fn sample(compression: Compression) -> Tree {
        let mut tree = Tree::new(DatabaseVersion::V4, "Root");
        tree.meta_mut().transform_rounds = 16;
        tree.meta_mut().compression = compression;
        tree.meta_mut().database_name = "Vault".to_string();
        let root = tree.root_id();
        let trash = tree.add_group(root, Group::new(GroupId::new(), "Recycle Bin")).unwrap();
        tree.set_role(Role::Trash, Some(trash)).unwrap();
        tree.add_entry(
            root,
            Entry::with_standard_fields(EntryId::new())
                .with_field(StringField::new("PIN", "0000", true)),
        )
        .unwrap();
        tree
    }

    #[test]
    fn gzip_and_plain_payloads_roundtrip() {
        for compression in [Compression::Gzip, Compression::None] {
            let tree = sample(compression);
            let bytes = encode(&tree, &key("pw")).unwrap();
            assert_eq!(decode(&bytes, &key("pw")).unwrap(), tree);
        }
    }

    #[test]
    fn wrong_password_is_rejected() {
        let bytes = encode(&sample(Compression::Gzip), &key("right")).unwrap();
        assert!(decode(&bytes, &key("wrong")).unwrap_err().is_wrong_credentials());
    }

    #[test]
    fn ciphertext_is_fresh_each_save() {
        let tree = sample(Compression::Gzip);
        assert_ne!(encode(&tree, &key("pw")).unwrap(), encode(&tree, &key("pw")).unwrap());
    }

    #[test]
    fn tampered_header_fails_hash_check() {
        let tree = sample(Compression::None);
        let mut bytes = encode(&tree, &key("pw")).unwrap();
        // The comment field is ignored by the parser but covered by the
        // header hash; splice one in after the version.
        let comment = [1u8, 2, 0, b'h', b'i'];
        bytes.splice(12..12, comment);
        let err = decode(&bytes, &key("pw")).unwrap_err();
        assert!(matches!(err, CodecError::CorruptDatabase { .. }));
    }

    #[test]
    fn protected_value_survives() {
        let tree = sample(Compression::None);
        let decoded = decode(&encode(&tree, &key("pw")).unwrap(), &key("pw")).unwrap();
        let entry = decoded.walk_entries()[0];
        assert!(entry.field(PASSWORD).unwrap().is_protected());
        assert_eq!(entry.value("PIN"), "0000");
    }
}
