//! Hashed block stream.
//!
//! The decrypted payload is split into blocks, each prefixed with its
//! index, SHA-256 hash and length. A zero-length block with an all-zero
//! hash terminates the stream.

use crate::error::{CodecError, CodecResult};
use crate::reader::ByteReader;
use sha2::{Digest, Sha256};

/// Payload bytes per block when writing.
pub(crate) const BLOCK_SIZE: usize = 1024 * 1024;

/// Verifies and concatenates all blocks.
pub(crate) fn read_blocks(data: &[u8]) -> CodecResult<Vec<u8>> {
    let mut reader = ByteReader::new(data);
    let mut out = Vec::with_capacity(data.len());
    let mut expected = 0u32;
    loop {
        let index = reader.read_u32()?;
        if index != expected {
            return Err(CodecError::corrupt(format!(
                "block index {index} where {expected} was expected"
            )));
        }
        let hash: [u8; 32] = reader.read_array()?;
        let size = usize::try_from(reader.read_u32()?)
            .map_err(|_| CodecError::corrupt("block size overflow"))?;
        if size == 0 {
            if hash != [0u8; 32] {
                return Err(CodecError::corrupt("final block has a non-zero hash"));
            }
            break;
        }
        let block = reader.read_bytes(size)?;
        if Sha256::digest(block).as_slice() != hash {
            return Err(CodecError::corrupt(format!("block {index} hash mismatch")));
        }
        out.extend_from_slice(block);
        expected = expected
            .checked_add(1)
            .ok_or_else(|| CodecError::corrupt("too many blocks"))?;
    }
    Ok(out)
}

/// Splits `data` into hashed blocks.
pub(crate) fn write_blocks(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 48 * (data.len() / BLOCK_SIZE + 2));
    let mut index = 0u32;
    for chunk in data.chunks(BLOCK_SIZE) {
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&Sha256::digest(chunk));
        // Chunks are at most BLOCK_SIZE long.
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(chunk);
        index += 1;
    }
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&[0u8; 32]);
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_a_single_terminator() {
        let blocks = write_blocks(&[]);
        assert_eq!(blocks.len(), 40);
        assert!(read_blocks(&blocks).unwrap().is_empty());
    }

    #[test]
    fn multi_block_payload() {
        let data: Vec<u8> = (0..BLOCK_SIZE + 10).map(|i| (i % 251) as u8).collect();
        let blocks = write_blocks(&data);
        assert_eq!(read_blocks(&blocks).unwrap(), data);
    }

    #[test]
    fn flipped_byte_is_caught() {
        let mut blocks = write_blocks(b"some payload");
        blocks[45] ^= 0xFF;
        let err = read_blocks(&blocks).unwrap_err();
        assert!(matches!(err, CodecError::CorruptDatabase { .. }));
    }

    #[test]
    fn missing_terminator_is_corrupt() {
        let blocks = write_blocks(b"payload");
        assert!(read_blocks(&blocks[..blocks.len() - 40]).is_err());
    }
}
