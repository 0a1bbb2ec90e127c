//! Little-endian cursor over a byte slice.

use crate::error::{CodecError, CodecResult};

/// Reads fixed-width little-endian values, failing with a corruption
/// error instead of panicking on truncated input.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    #[inline]
    pub(crate) fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                CodecError::corrupt(format!(
                    "unexpected end of data: wanted {len} bytes at offset {}",
                    self.pos
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    #[inline]
    pub(crate) fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    #[inline]
    pub(crate) fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    #[inline]
    pub(crate) fn read_u16(&mut self) -> CodecResult<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    #[inline]
    pub(crate) fn read_u32(&mut self) -> CodecResult<u32> {
        self.read_array().map(u32::from_le_bytes)
    }
}

/// Interprets a field payload as a little-endian `u32`.
pub(crate) fn u32_field(data: &[u8], what: &str) -> CodecResult<u32> {
    <[u8; 4]>::try_from(data)
        .map(u32::from_le_bytes)
        .map_err(|_| CodecError::corrupt(format!("{what}: expected 4 bytes, got {}", data.len())))
}

/// Interprets a field payload as a little-endian `u64`.
pub(crate) fn u64_field(data: &[u8], what: &str) -> CodecResult<u64> {
    <[u8; 8]>::try_from(data)
        .map(u64::from_le_bytes)
        .map_err(|_| CodecError::corrupt(format!("{what}: expected 8 bytes, got {}", data.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0302);
        assert_eq!(reader.read_u32().unwrap(), 0x0706_0504);
        assert!(reader.is_empty());
        assert_eq!(reader.position(), 7);
    }

    #[test]
    fn truncated_input_is_corrupt() {
        let mut reader = ByteReader::new(&[1, 2]);
        let err = reader.read_u32().unwrap_err();
        assert!(matches!(err, CodecError::CorruptDatabase { .. }));
        // A failed read does not advance.
        assert_eq!(reader.remaining(), &[1, 2]);
    }

    #[test]
    fn fixed_width_fields() {
        assert_eq!(u32_field(&7u32.to_le_bytes(), "x").unwrap(), 7);
        assert!(u32_field(&[1, 2, 3], "x").is_err());
        assert_eq!(u64_field(&9u64.to_le_bytes(), "x").unwrap(), 9);
    }
}
