//! Credential verifier for unlocking a document.
//!
//! Unlocking never touches the ciphertext again. When a document is opened
//! or saved, an HMAC-SHA256 of the composite key under a fresh random salt
//! is kept; unlocking recomputes it from the supplied credentials and
//! compares in constant time.

use hmac::{Hmac, Mac};
use passdb_codec::CompositeKey;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

const SALT_SIZE: usize = 32;

/// Salted MAC of a composite key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct Verifier {
    salt: [u8; SALT_SIZE],
    tag: [u8; 32],
}

impl Verifier {
    /// Derives a verifier for `key` with a fresh salt.
    pub(crate) fn new(key: &CompositeKey) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let tag = Self::mac(&salt, key).finalize().into_bytes().into();
        Self { salt, tag }
    }

    /// Returns true if `key` is the key this verifier was made from.
    pub(crate) fn matches(&self, key: &CompositeKey) -> bool {
        Self::mac(&self.salt, key).verify_slice(&self.tag).is_ok()
    }

    fn mac(salt: &[u8; SALT_SIZE], key: &CompositeKey) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC can take key of any size");
        mac.update(key.as_bytes());
        mac
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Verifier([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passdb_codec::Credentials;
    use passdb_model::DatabaseVersion;

    fn key(password: &str) -> CompositeKey {
        Credentials::password(password)
            .composite_key(DatabaseVersion::V4)
            .unwrap()
    }

    #[test]
    fn accepts_only_the_original_key() {
        let verifier = Verifier::new(&key("secret"));
        assert!(verifier.matches(&key("secret")));
        assert!(!verifier.matches(&key("Secret")));
    }

    #[test]
    fn salts_differ() {
        let a = Verifier::new(&key("secret"));
        let b = Verifier::new(&key("secret"));
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.tag, b.tag);
    }
}
