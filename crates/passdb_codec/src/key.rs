//! Credentials, composite keys and the AES key transformation.
//!
//! ## Key derivation
//!
//! 1. The password and key file are combined into a 32-byte composite key.
//!    The combination differs between layouts (see [`Credentials::composite_key`]).
//! 2. The composite key is encrypted `rounds` times with AES-256-ECB under
//!    the file's transform seed, then hashed with SHA-256.
//! 3. The final cipher key is `SHA-256(master_seed || transformed)`.
//!
//! All intermediate key material is zeroized when dropped.

use crate::error::{CodecError, CodecResult};
use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use passdb_model::DatabaseVersion;
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of every derived key in bytes.
pub const KEY_SIZE: usize = 32;

/// What the user supplies to open a database.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    password: Option<String>,
    key_file: Option<Vec<u8>>,
}

impl Credentials {
    /// Empty credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials holding only a password.
    #[must_use]
    pub fn password(password: impl Into<String>) -> Self {
        Self::new().with_password(password)
    }

    /// Sets the password. An empty string still counts as a password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the raw content of a key file.
    #[must_use]
    pub fn with_key_file_contents(mut self, contents: Vec<u8>) -> Self {
        self.key_file = Some(contents);
        self
    }

    /// Reads a key file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the file cannot be read.
    pub fn with_key_file(self, path: &Path) -> CodecResult<Self> {
        let contents = std::fs::read(path)?;
        debug!(path = %path.display(), len = contents.len(), "read key file");
        Ok(self.with_key_file_contents(contents))
    }

    /// Returns true if a password is set.
    #[must_use]
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Returns true if a key file is set.
    #[must_use]
    pub fn has_key_file(&self) -> bool {
        self.key_file.is_some()
    }

    /// Returns true if neither part is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_password() && !self.has_key_file()
    }

    /// Combines the parts into the composite key for `version`.
    ///
    /// - KDBX: `SHA-256(SHA-256(password) || key_file_key)`, absent parts
    ///   skipped.
    /// - KDB: password only gives `SHA-256(password)`, key file only gives
    ///   the key file key, both give `SHA-256(SHA-256(password) || key_file_key)`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingCredentials`] if both parts are absent.
    pub fn composite_key(&self, version: DatabaseVersion) -> CodecResult<CompositeKey> {
        if self.is_empty() {
            return Err(CodecError::MissingCredentials);
        }
        let password_hash = self
            .password
            .as_ref()
            .map(|p| Zeroizing::new(<[u8; KEY_SIZE]>::from(Sha256::digest(p.as_bytes()))));
        let file_key = self.key_file.as_deref().map(key_file_key);

        let bytes: [u8; KEY_SIZE] = match (version, &password_hash, &file_key) {
            (DatabaseVersion::V3, Some(pw), None) => **pw,
            (DatabaseVersion::V3, None, Some(key)) => **key,
            _ => {
                let mut hasher = Sha256::new();
                if let Some(pw) = &password_hash {
                    hasher.update(pw.as_slice());
                }
                if let Some(key) = &file_key {
                    hasher.update(key.as_slice());
                }
                hasher.finalize().into()
            }
        };
        Ok(CompositeKey { bytes, version })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("key_file", &self.key_file.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Derives the 32-byte key contribution of a key file.
///
/// - exactly 32 bytes: used as-is
/// - 64 hex characters: hex-decoded
/// - an XML key file: the key in its `Key/Data` element
/// - anything else: SHA-256 of the content
#[must_use]
pub fn key_file_key(contents: &[u8]) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    if contents.len() == KEY_SIZE {
        key.copy_from_slice(contents);
        return key;
    }
    if contents.len() == 2 * KEY_SIZE && hex::decode_to_slice(contents, key.as_mut_slice()).is_ok() {
        return key;
    }
    if let Some(data) = xml_key_data(contents) {
        if data.len() == KEY_SIZE {
            key.copy_from_slice(&data);
            return key;
        }
    }
    key.copy_from_slice(&Sha256::digest(contents));
    key
}

/// Extracts the key from a KeePass XML key file (format 1.0 base64 or
/// 2.0 hex).
fn xml_key_data(contents: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    let text = std::str::from_utf8(contents).ok()?;
    if !text.trim_start().starts_with('<') {
        return None;
    }
    let mut reader = Reader::from_str(text);
    let mut path: Vec<String> = Vec::new();
    let mut version = String::new();
    let mut data = None;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned()),
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let value = t.unescape().ok()?;
                match path.last().map(String::as_str) {
                    Some("Version") => version = value.trim().to_string(),
                    Some("Data") => data = Some(Zeroizing::new(value.into_owned())),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    let data = data?;
    let compact: Zeroizing<String> =
        Zeroizing::new(data.chars().filter(|c| !c.is_whitespace()).collect());
    let decoded = if version.starts_with('2') {
        hex::decode(compact.as_bytes()).ok()?
    } else {
        STANDARD.decode(compact.as_bytes()).ok()?
    };
    Some(Zeroizing::new(decoded))
}

/// A 32-byte key derived from [`Credentials`] for one layout.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CompositeKey {
    bytes: [u8; KEY_SIZE],
    #[zeroize(skip)]
    version: DatabaseVersion,
}

impl CompositeKey {
    /// The layout this key was derived for.
    #[must_use]
    pub fn version(&self) -> DatabaseVersion {
        self.version
    }

    /// Returns the key bytes.
    ///
    /// Don't log or persist the result.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Runs the AES key transformation and mixes in the master seed,
    /// producing the payload cipher key.
    #[must_use]
    pub fn master_key(
        &self,
        master_seed: &[u8],
        transform_seed: &[u8; KEY_SIZE],
        rounds: u64,
    ) -> Zeroizing<[u8; KEY_SIZE]> {
        let transformed = transform(&self.bytes, transform_seed, rounds);
        let mut hasher = Sha256::new();
        hasher.update(master_seed);
        hasher.update(transformed.as_slice());
        Zeroizing::new(hasher.finalize().into())
    }
}

impl std::fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeKey")
            .field("bytes", &"[REDACTED]")
            .field("version", &self.version)
            .finish()
    }
}

/// AES-256-ECB encrypts both halves of `key` `rounds` times under `seed`,
/// then hashes the result.
fn transform(key: &[u8; KEY_SIZE], seed: &[u8; KEY_SIZE], rounds: u64) -> Zeroizing<[u8; KEY_SIZE]> {
    let cipher = Aes256::new(GenericArray::from_slice(seed));
    let mut blocks = [
        GenericArray::clone_from_slice(&key[..16]),
        GenericArray::clone_from_slice(&key[16..]),
    ];
    for _ in 0..rounds {
        cipher.encrypt_blocks(&mut blocks);
    }

    let mut hasher = Sha256::new();
    hasher.update(blocks[0].as_slice());
    hasher.update(blocks[1].as_slice());
    for block in &mut blocks {
        block.as_mut_slice().zeroize();
    }
    Zeroizing::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let err = Credentials::new()
            .composite_key(DatabaseVersion::V4)
            .unwrap_err();
        assert!(matches!(err, CodecError::MissingCredentials));
    }

    #[test]
    fn kdbx_password_only() {
        let key = Credentials::password("pw")
            .composite_key(DatabaseVersion::V4)
            .unwrap();
        assert_eq!(key.as_bytes(), &sha(&sha(b"pw")));
    }

    #[test]
    fn kdb_password_only_is_single_hash() {
        let key = Credentials::password("pw")
            .composite_key(DatabaseVersion::V3)
            .unwrap();
        assert_eq!(key.as_bytes(), &sha(b"pw"));
    }

    #[test]
    fn kdb_key_file_only_is_raw_key() {
        let raw = [7u8; 32];
        let key = Credentials::new()
            .with_key_file_contents(raw.to_vec())
            .composite_key(DatabaseVersion::V3)
            .unwrap();
        assert_eq!(key.as_bytes(), &raw);
    }

    #[test]
    fn both_parts_combine_in_both_layouts() {
        let raw = [9u8; 32];
        let creds = Credentials::password("pw").with_key_file_contents(raw.to_vec());
        let mut expected = sha(b"pw").to_vec();
        expected.extend_from_slice(&raw);
        let expected = sha(&expected);

        assert_eq!(creds.composite_key(DatabaseVersion::V3).unwrap().as_bytes(), &expected);
        assert_eq!(creds.composite_key(DatabaseVersion::V4).unwrap().as_bytes(), &expected);
    }

    #[test]
    fn key_file_forms() {
        let raw = [0xABu8; 32];
        assert_eq!(*key_file_key(&raw), raw);

        let hex_form = hex::encode(raw);
        assert_eq!(*key_file_key(hex_form.as_bytes()), raw);

        let arbitrary = b"not a key of any recognised form";
        assert_eq!(*key_file_key(arbitrary), sha(arbitrary));

        // 64 bytes that are not hex fall back to hashing.
        let not_hex = [b'z'; 64];
        assert_eq!(*key_file_key(&not_hex), sha(&not_hex));
    }

    #[test]
    fn xml_key_file() {
        let raw = [0x42u8; 32];
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<KeyFile>\n\t<Meta>\n\t\t<Version>1.00</Version>\n\t</Meta>\n\t<Key>\n\t\t<Data>{}</Data>\n\t</Key>\n</KeyFile>",
            STANDARD.encode(raw)
        );
        assert_eq!(*key_file_key(xml.as_bytes()), raw);
    }

    #[test]
    fn transform_depends_on_rounds_and_seed() {
        let key = Credentials::password("pw")
            .composite_key(DatabaseVersion::V4)
            .unwrap();
        let seed = [1u8; 32];
        let a = key.master_key(&[0u8; 32], &seed, 10);
        let b = key.master_key(&[0u8; 32], &seed, 11);
        let c = key.master_key(&[0u8; 32], &[2u8; 32], 10);
        assert_ne!(*a, *b);
        assert_ne!(*a, *c);
        assert_eq!(*a, *key.master_key(&[0u8; 32], &seed, 10));
    }

    #[test]
    fn key_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.key");
        std::fs::write(&path, [0x11u8; 32]).unwrap();

        let creds = Credentials::new().with_key_file(&path).unwrap();
        assert!(creds.has_key_file());
        assert!(!creds.has_password());
        let key = creds.composite_key(DatabaseVersion::V3).unwrap();
        assert_eq!(key.as_bytes(), &[0x11u8; 32]);

        let missing = Credentials::new().with_key_file(&dir.path().join("nope"));
        assert!(matches!(missing, Err(CodecError::Io(_))));
    }

    #[test]
    fn debug_is_redacted() {
        let creds = Credentials::password("hunter2");
        assert!(!format!("{creds:?}").contains("hunter2"));
        let key = creds.composite_key(DatabaseVersion::V4).unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
