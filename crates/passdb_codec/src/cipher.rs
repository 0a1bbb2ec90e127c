//! AES-256-CBC payload encryption with PKCS#7 padding.

use crate::error::{CodecError, CodecResult};
use aes::cipher::{
    block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use aes::Aes256;

/// Size of the CBC initialisation vector.
pub const IV_SIZE: usize = 16;

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

/// Encrypts `plaintext`.
#[must_use]
pub fn encrypt(key: &[u8; 32], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Vec<u8> {
    Encryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypts `ciphertext`.
///
/// # Errors
///
/// A ciphertext that is not a whole number of blocks is corrupt. Invalid
/// padding almost always means the key was wrong and is reported as
/// [`CodecError::WrongCredentials`].
pub fn decrypt(key: &[u8; 32], iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> CodecResult<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CodecError::corrupt(format!(
            "ciphertext length {} is not a multiple of the block size",
            ciphertext.len()
        )));
    }
    Decryptor::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::WrongCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_padded_to_blocks() {
        let key = [1u8; 32];
        let iv = [2u8; 16];
        assert_eq!(encrypt(&key, &iv, b"").len(), 16);
        assert_eq!(encrypt(&key, &iv, &[0u8; 16]).len(), 32);
        let ct = encrypt(&key, &iv, b"secret payload");
        assert_eq!(decrypt(&key, &iv, &ct).unwrap(), b"secret payload");
    }

    #[test]
    fn wrong_key_never_yields_plaintext() {
        let plaintext = b"attack at dawn, bring snacks";
        let ct = encrypt(&[1u8; 32], &[0u8; 16], plaintext);
        let result = decrypt(&[3u8; 32], &[0u8; 16], &ct);
        assert_ne!(result.ok(), Some(plaintext.to_vec()));
    }

    #[test]
    fn ragged_ciphertext_is_corrupt() {
        let err = decrypt(&[0u8; 32], &[0u8; 16], &[0u8; 15]).unwrap_err();
        assert!(matches!(err, CodecError::CorruptDatabase { .. }));
    }
}
