//! Inner random stream protecting field values inside the XML payload.

use salsa20::cipher::{generic_array::GenericArray, KeyIvInit, StreamCipher};
use salsa20::Salsa20;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Header id of the Salsa20 inner stream.
pub(crate) const SALSA20_ID: u32 = 2;

const NONCE: [u8; 8] = [0xE8, 0x30, 0x09, 0x4B, 0x97, 0x20, 0x5D, 0x2A];

/// Salsa20 keystream shared by every protected value, consumed in
/// document order.
pub(crate) struct InnerStream {
    cipher: Salsa20,
}

impl InnerStream {
    /// Keys the stream with `SHA-256(protected_stream_key)`.
    pub(crate) fn new(protected_stream_key: &[u8]) -> Self {
        let key = Zeroizing::new(<[u8; 32]>::from(Sha256::digest(protected_stream_key)));
        let cipher = Salsa20::new(
            GenericArray::from_slice(key.as_slice()),
            GenericArray::from_slice(&NONCE),
        );
        Self { cipher }
    }

    /// XORs the next `data.len()` keystream bytes into `data`.
    pub(crate) fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_is_continuous() {
        let key = [5u8; 32];
        let mut whole = *b"first-second";
        InnerStream::new(&key).apply(&mut whole);

        let mut split = InnerStream::new(&key);
        let mut a = *b"first-";
        let mut b = *b"second";
        split.apply(&mut a);
        split.apply(&mut b);

        assert_eq!(&whole[..6], &a);
        assert_eq!(&whole[6..], &b);
    }

    #[test]
    fn applying_twice_restores() {
        let mut data = *b"secret";
        InnerStream::new(b"k").apply(&mut data);
        assert_ne!(&data, b"secret");
        InnerStream::new(b"k").apply(&mut data);
        assert_eq!(&data, b"secret");
    }
}
