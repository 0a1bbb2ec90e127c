//! KDBX outer header: signatures, version and TLV fields.

use super::stream::SALSA20_ID;
use crate::error::{CodecError, CodecResult};
use crate::kdb::SIGNATURE_1;
use crate::reader::{u32_field, u64_field, ByteReader};
use passdb_model::{Compression, DatabaseVersion, FormatVersion, Tree};
use rand::RngCore;
use tracing::debug;
use uuid::{uuid, Uuid};

/// Second file signature identifying KDBX.
pub const SIGNATURE_2: u32 = 0xB54B_FB67;

/// Cipher id of AES-256-CBC.
pub(crate) const AES_CIPHER: Uuid = uuid!("31c1f2e6-bf71-4350-be58-05216afc5aff");

mod field {
    pub(super) const END: u8 = 0;
    pub(super) const COMMENT: u8 = 1;
    pub(super) const CIPHER_ID: u8 = 2;
    pub(super) const COMPRESSION: u8 = 3;
    pub(super) const MASTER_SEED: u8 = 4;
    pub(super) const TRANSFORM_SEED: u8 = 5;
    pub(super) const TRANSFORM_ROUNDS: u8 = 6;
    pub(super) const ENCRYPTION_IV: u8 = 7;
    pub(super) const PROTECTED_STREAM_KEY: u8 = 8;
    pub(super) const STREAM_START_BYTES: u8 = 9;
    pub(super) const INNER_RANDOM_STREAM_ID: u8 = 10;
}

const END_MARKER: &[u8] = b"\r\n\r\n";

/// Parsed outer header.
pub(crate) struct KdbxHeader {
    pub(crate) version: FormatVersion,
    pub(crate) cipher: Uuid,
    pub(crate) compression: Compression,
    pub(crate) master_seed: [u8; 32],
    pub(crate) transform_seed: [u8; 32],
    pub(crate) rounds: u64,
    pub(crate) iv: [u8; 16],
    pub(crate) protected_stream_key: [u8; 32],
    pub(crate) stream_start: [u8; 32],
    pub(crate) inner_stream: u32,
}

impl KdbxHeader {
    /// A fresh header with random seeds for writing `tree`.
    pub(crate) fn generate(tree: &Tree) -> Self {
        let version = match tree.format() {
            f if f.major == 3 => f,
            _ => DatabaseVersion::V4.file_version(),
        };
        let mut header = Self {
            version,
            cipher: AES_CIPHER,
            compression: tree.meta().compression,
            master_seed: [0; 32],
            transform_seed: [0; 32],
            rounds: tree.meta().transform_rounds,
            iv: [0; 16],
            protected_stream_key: [0; 32],
            stream_start: [0; 32],
            inner_stream: SALSA20_ID,
        };
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut header.master_seed);
        rng.fill_bytes(&mut header.transform_seed);
        rng.fill_bytes(&mut header.iv);
        rng.fill_bytes(&mut header.protected_stream_key);
        rng.fill_bytes(&mut header.stream_start);
        header
    }

    /// Parses the header, returning it with its length in bytes.
    pub(crate) fn read(data: &[u8]) -> CodecResult<(Self, usize)> {
        let mut reader = ByteReader::new(data);
        let (sig1, sig2) = (reader.read_u32()?, reader.read_u32()?);
        if sig1 != SIGNATURE_1 || sig2 != SIGNATURE_2 {
            return Err(CodecError::unsupported("not a KDBX file"));
        }
        let version = FormatVersion::from_u32(reader.read_u32()?);
        if version.major != 3 {
            return Err(CodecError::unsupported(format!("KDBX version {version}")));
        }

        let mut cipher = None;
        let mut compression = None;
        let mut master_seed = None;
        let mut transform_seed = None;
        let mut rounds = None;
        let mut iv = None;
        let mut protected_stream_key = None;
        let mut stream_start = None;
        let mut inner_stream = None;
        loop {
            let id = reader.read_u8()?;
            let size = usize::from(reader.read_u16()?);
            let data = reader.read_bytes(size)?;
            match id {
                field::END => break,
                field::COMMENT => {}
                field::CIPHER_ID => {
                    cipher = Some(
                        Uuid::from_slice(data).map_err(|_| CodecError::corrupt("malformed cipher id"))?,
                    );
                }
                field::COMPRESSION => {
                    compression = Some(match u32_field(data, "compression flags")? {
                        0 => Compression::None,
                        1 => Compression::Gzip,
                        other => {
                            return Err(CodecError::unsupported(format!("compression algorithm {other}")))
                        }
                    });
                }
                field::MASTER_SEED => master_seed = Some(fixed(data, "master seed")?),
                field::TRANSFORM_SEED => transform_seed = Some(fixed(data, "transform seed")?),
                field::TRANSFORM_ROUNDS => rounds = Some(u64_field(data, "transform rounds")?),
                field::ENCRYPTION_IV => iv = Some(fixed(data, "encryption IV")?),
                field::PROTECTED_STREAM_KEY => {
                    protected_stream_key = Some(fixed(data, "protected stream key")?);
                }
                field::STREAM_START_BYTES => stream_start = Some(fixed(data, "stream start bytes")?),
                field::INNER_RANDOM_STREAM_ID => {
                    inner_stream = Some(u32_field(data, "inner random stream id")?);
                }
                other => debug!(field = other, size, "skipping unknown header field"),
            }
        }

        let header = Self {
            version,
            cipher: cipher.ok_or_else(|| missing("cipher id"))?,
            compression: compression.ok_or_else(|| missing("compression flags"))?,
            master_seed: master_seed.ok_or_else(|| missing("master seed"))?,
            transform_seed: transform_seed.ok_or_else(|| missing("transform seed"))?,
            rounds: rounds.ok_or_else(|| missing("transform rounds"))?,
            iv: iv.ok_or_else(|| missing("encryption IV"))?,
            protected_stream_key: protected_stream_key
                .ok_or_else(|| missing("protected stream key"))?,
            stream_start: stream_start.ok_or_else(|| missing("stream start bytes"))?,
            inner_stream: inner_stream.ok_or_else(|| missing("inner random stream id"))?,
        };
        if header.cipher != AES_CIPHER {
            return Err(CodecError::unsupported(format!("cipher {}", header.cipher)));
        }
        if header.inner_stream != SALSA20_ID {
            return Err(CodecError::unsupported(format!(
                "inner random stream {}",
                header.inner_stream
            )));
        }
        Ok((header, reader.position()))
    }

    /// Serialises the header.
    pub(crate) fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        out.extend_from_slice(&SIGNATURE_2.to_le_bytes());
        out.extend_from_slice(&self.version.to_u32().to_le_bytes());

        let compression: u32 = match self.compression {
            Compression::None => 0,
            Compression::Gzip => 1,
        };
        write_field(&mut out, field::CIPHER_ID, self.cipher.as_bytes());
        write_field(&mut out, field::COMPRESSION, &compression.to_le_bytes());
        write_field(&mut out, field::MASTER_SEED, &self.master_seed);
        write_field(&mut out, field::TRANSFORM_SEED, &self.transform_seed);
        write_field(&mut out, field::TRANSFORM_ROUNDS, &self.rounds.to_le_bytes());
        write_field(&mut out, field::ENCRYPTION_IV, &self.iv);
        write_field(&mut out, field::PROTECTED_STREAM_KEY, &self.protected_stream_key);
        write_field(&mut out, field::STREAM_START_BYTES, &self.stream_start);
        write_field(&mut out, field::INNER_RANDOM_STREAM_ID, &self.inner_stream.to_le_bytes());
        write_field(&mut out, field::END, END_MARKER);
        out
    }
}

fn missing(what: &str) -> CodecError {
    CodecError::corrupt(format!("header field missing: {what}"))
}

fn fixed<const N: usize>(data: &[u8], what: &str) -> CodecResult<[u8; N]> {
    <[u8; N]>::try_from(data).map_err(|_| {
        CodecError::corrupt(format!("{what}: expected {N} bytes, got {}", data.len()))
    })
}

fn write_field(out: &mut Vec<u8>, id: u8, data: &[u8]) {
    out.push(id);
    // Header fields are all fixed and short.
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
}
