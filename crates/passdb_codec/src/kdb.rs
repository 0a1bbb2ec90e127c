//! KeePass 1.x (`.kdb`) layout.
//!
//! ## File layout
//!
//! ```text
//! +-----------------------+
//! | Header (124 bytes)    |  signatures, flags, version, seeds, counts,
//! |                       |  SHA-256 of the plaintext body, rounds
//! +-----------------------+
//! | AES-256-CBC body      |  group records, then entry records
//! +-----------------------+
//! ```
//!
//! Each record is a run of `(type: u16, size: u32, data)` fields closed by
//! type `0xFFFF`. Groups are stored in preorder with an explicit depth; the
//! root group is implicit.
//!
//! ## Normalisations
//!
//! - Group ids are not stored; groups get ids derived from their 1-based
//!   preorder number, the root the nil id.
//! - Only the five standard fields are stored; the password is the only
//!   protected field after a reload.
//! - Each entry holds at most one attachment, stored inline.
//! - The trash group is the top-level group named `Backup`.

use crate::cipher;
use crate::error::{CodecError, CodecResult};
use crate::key::CompositeKey;
use crate::reader::{u32_field, ByteReader};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use passdb_model::{
    BinaryRef, DatabaseVersion, Entry, EntryId, FormatVersion, Group, GroupId, Role, StringField,
    Times, Tree, NOTES, PASSWORD, TITLE, URL, USER_NAME,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroizing;

/// First file signature, shared with KDBX.
pub const SIGNATURE_1: u32 = 0x9AA2_D903;
/// Second file signature identifying KDB.
pub const SIGNATURE_2: u32 = 0xB54B_FB65;

const HEADER_SIZE: usize = 124;
const FLAG_SHA2: u32 = 1;
const FLAG_RIJNDAEL: u32 = 2;

/// Name of the top-level group acting as trash.
pub const BACKUP_GROUP: &str = "Backup";
/// Name given to the implicit root group on decode.
pub const ROOT_NAME: &str = "Root";

const FIELD_END: u16 = 0xFFFF;

/// Fixed-size file header.
struct Header {
    flags: u32,
    version: u32,
    master_seed: [u8; 16],
    iv: [u8; 16],
    groups: u32,
    entries: u32,
    content_hash: [u8; 32],
    transform_seed: [u8; 32],
    rounds: u32,
}

impl Header {
    fn read(data: &[u8]) -> CodecResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CodecError::corrupt("file shorter than the KDB header"));
        }
        let mut reader = ByteReader::new(&data[..HEADER_SIZE]);
        let (sig1, sig2) = (reader.read_u32()?, reader.read_u32()?);
        if sig1 != SIGNATURE_1 || sig2 != SIGNATURE_2 {
            return Err(CodecError::unsupported("not a KDB file"));
        }
        Ok(Self {
            flags: reader.read_u32()?,
            version: reader.read_u32()?,
            master_seed: reader.read_array()?,
            iv: reader.read_array()?,
            groups: reader.read_u32()?,
            entries: reader.read_u32()?,
            content_hash: reader.read_array()?,
            transform_seed: reader.read_array()?,
            rounds: reader.read_u32()?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        out.extend_from_slice(&SIGNATURE_2.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.master_seed);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.groups.to_le_bytes());
        out.extend_from_slice(&self.entries.to_le_bytes());
        out.extend_from_slice(&self.content_hash);
        out.extend_from_slice(&self.transform_seed);
        out.extend_from_slice(&self.rounds.to_le_bytes());
    }
}

/// Reads the header version and rounds without decrypting.
pub(crate) fn read_info(data: &[u8]) -> CodecResult<(FormatVersion, u64)> {
    Header::read(data).map(|h| (FormatVersion::from_u32(h.version), u64::from(h.rounds)))
}

// ----------------------------------------------------------------------
// Decoding
// ----------------------------------------------------------------------

/// Decrypts and parses a KDB file.
pub(crate) fn decode(data: &[u8], key: &CompositeKey) -> CodecResult<Tree> {
    let header = Header::read(data)?;
    let format = FormatVersion::from_u32(header.version);
    if format.major != 3 {
        return Err(CodecError::unsupported(format!("KDB version {format}")));
    }
    if header.flags & FLAG_RIJNDAEL == 0 {
        return Err(CodecError::unsupported("KDB cipher other than AES"));
    }
    debug!(version = %format, rounds = header.rounds, "decrypting KDB payload");

    let master = key.master_key(&header.master_seed, &header.transform_seed, header.rounds.into());
    let plain = Zeroizing::new(cipher::decrypt(&master, &header.iv, &data[HEADER_SIZE..])?);
    if Sha256::digest(plain.as_slice()).as_slice() != header.content_hash {
        return Err(CodecError::WrongCredentials);
    }

    let mut tree = parse_body(&plain, header.groups, header.entries)?;
    tree.set_format(format);
    tree.meta_mut().transform_rounds = header.rounds.into();
    tree.validate()?;
    info!(
        groups = tree.group_count(),
        entries = tree.entry_count(),
        "KDB database decoded"
    );
    Ok(tree)
}

struct RawGroup {
    file_id: u32,
    level: u16,
    name: String,
    icon: u32,
    times: Times,
}

#[derive(Default)]
struct RawEntry {
    id: Option<EntryId>,
    group: Option<u32>,
    icon: u32,
    title: String,
    url: String,
    user_name: String,
    password: Zeroizing<String>,
    notes: String,
    times: Option<Times>,
    binary_name: String,
    binary: Vec<u8>,
}

impl RawEntry {
    fn is_meta_stream(&self) -> bool {
        self.title == "Meta-Info"
            && self.user_name == "SYSTEM"
            && self.url == "$"
            && self.binary_name == "bin-stream"
    }
}

fn parse_body(plain: &[u8], group_count: u32, entry_count: u32) -> CodecResult<Tree> {
    let mut reader = ByteReader::new(plain);
    let mut tree = Tree::with_root(
        DatabaseVersion::V3,
        Group::new(GroupId::from_bytes([0; 16]), ROOT_NAME)
            .with_times(Times::at(DateTime::<Utc>::default())),
    );
    let root = tree.root_id();

    let mut by_file_id: HashMap<u32, GroupId> = HashMap::new();
    let mut ancestors: Vec<GroupId> = Vec::new();
    for number in 1..=group_count {
        let raw = read_group(&mut reader)?;
        let level = usize::from(raw.level);
        if level > ancestors.len() {
            return Err(CodecError::corrupt(format!(
                "group '{}' at level {level} has no parent",
                raw.name
            )));
        }
        ancestors.truncate(level);
        let parent = ancestors.last().copied().unwrap_or(root);

        let id = preorder_group_id(number);
        tree.add_group(
            parent,
            Group::new(id, raw.name.as_str())
                .with_icon(raw.icon)
                .with_times(raw.times),
        )?;
        if by_file_id.insert(raw.file_id, id).is_some() {
            return Err(CodecError::corrupt(format!("duplicate group id {}", raw.file_id)));
        }
        if level == 0 && raw.name == BACKUP_GROUP && tree.trash().is_none() {
            tree.set_role(Role::Trash, Some(id))?;
        }
        ancestors.push(id);
    }

    for _ in 0..entry_count {
        let raw = read_entry(&mut reader)?;
        if raw.is_meta_stream() {
            debug!(len = raw.binary.len(), "skipping meta-stream entry");
            continue;
        }
        let id = raw
            .id
            .ok_or_else(|| CodecError::corrupt("entry without UUID"))?;
        let group = raw
            .group
            .and_then(|g| by_file_id.get(&g).copied())
            .ok_or_else(|| CodecError::corrupt(format!("entry {id} refers to a missing group")))?;

        let mut entry = Entry::new(id)
            .with_icon(raw.icon)
            .with_field(StringField::new(TITLE, raw.title.as_str(), false))
            .with_field(StringField::new(USER_NAME, raw.user_name.as_str(), false))
            .with_field(StringField::new(PASSWORD, raw.password.as_str(), true))
            .with_field(StringField::new(URL, raw.url.as_str(), false))
            .with_field(StringField::new(NOTES, raw.notes.as_str(), false));
        if let Some(times) = raw.times {
            entry = entry.with_times(times);
        }
        if !raw.binary_name.is_empty() || !raw.binary.is_empty() {
            let binary = tree.attachments_mut().add_binary(raw.binary.clone());
            entry = entry.with_attachment(BinaryRef::new(raw.binary_name.as_str(), binary));
        }
        tree.add_entry(group, entry)?;
    }

    if !reader.is_empty() {
        debug!(trailing = reader.remaining().len(), "ignoring bytes after last record");
    }
    Ok(tree)
}

/// Id given to the group at 1-based preorder position `number`.
#[must_use]
pub fn preorder_group_id(number: u32) -> GroupId {
    GroupId::from(Uuid::from_u128(u128::from(number)))
}

fn next_field<'a>(reader: &mut ByteReader<'a>) -> CodecResult<(u16, &'a [u8])> {
    let field_type = reader.read_u16()?;
    let size = reader.read_u32()?;
    let size = usize::try_from(size).map_err(|_| CodecError::corrupt("field size overflow"))?;
    Ok((field_type, reader.read_bytes(size)?))
}

fn read_group(reader: &mut ByteReader<'_>) -> CodecResult<RawGroup> {
    let mut file_id = None;
    let mut group = RawGroup {
        file_id: 0,
        level: 0,
        name: String::new(),
        icon: 0,
        times: Times::now(),
    };
    loop {
        let (field_type, data) = next_field(reader)?;
        match field_type {
            0x0001 => file_id = Some(u32_field(data, "group id")?),
            0x0002 => group.name = string_field(data)?,
            0x0003 => group.times.creation = unpack_time(data)?,
            0x0004 => group.times.last_modification = unpack_time(data)?,
            0x0005 => group.times.last_access = unpack_time(data)?,
            0x0006 => group.times.expiry = unpack_expiry(data)?,
            0x0007 => group.icon = u32_field(data, "group icon")?,
            0x0008 => {
                let level = <[u8; 2]>::try_from(data)
                    .map_err(|_| CodecError::corrupt("group level: expected 2 bytes"))?;
                group.level = u16::from_le_bytes(level);
            }
            // 0x0000 is a comment, 0x0009 holds UI flags.
            0x0000 | 0x0009 => {}
            FIELD_END => break,
            other => debug!(field = other, "skipping unknown group field"),
        }
    }
    group.file_id = file_id.ok_or_else(|| CodecError::corrupt("group without id"))?;
    Ok(group)
}

fn read_entry(reader: &mut ByteReader<'_>) -> CodecResult<RawEntry> {
    let mut entry = RawEntry::default();
    let mut times = Times::now();
    let mut has_times = false;
    loop {
        let (field_type, data) = next_field(reader)?;
        match field_type {
            0x0001 => {
                entry.id = Some(
                    EntryId::from_slice(data)
                        .ok_or_else(|| CodecError::corrupt("malformed entry UUID"))?,
                );
            }
            0x0002 => entry.group = Some(u32_field(data, "entry group id")?),
            0x0003 => entry.icon = u32_field(data, "entry icon")?,
            0x0004 => entry.title = string_field(data)?,
            0x0005 => entry.url = string_field(data)?,
            0x0006 => entry.user_name = string_field(data)?,
            0x0007 => entry.password = Zeroizing::new(string_field(data)?),
            0x0008 => entry.notes = string_field(data)?,
            0x0009 => {
                times.creation = unpack_time(data)?;
                has_times = true;
            }
            0x000A => times.last_modification = unpack_time(data)?,
            0x000B => times.last_access = unpack_time(data)?,
            0x000C => times.expiry = unpack_expiry(data)?,
            0x000D => entry.binary_name = string_field(data)?,
            0x000E => entry.binary = data.to_vec(),
            0x0000 => {}
            FIELD_END => break,
            other => debug!(field = other, "skipping unknown entry field"),
        }
    }
    entry.times = has_times.then_some(times);
    Ok(entry)
}

/// Null-terminated UTF-8.
fn string_field(data: &[u8]) -> CodecResult<String> {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec())
        .map_err(|_| CodecError::corrupt("string field is not valid UTF-8"))
}

// ----------------------------------------------------------------------
// Packed timestamps
// ----------------------------------------------------------------------

/// The "never expires" marker: 2999-12-28 23:59:59.
fn never() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2999, 12, 28, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn unpack_time(data: &[u8]) -> CodecResult<DateTime<Utc>> {
    let b = <[u8; 5]>::try_from(data)
        .map_err(|_| CodecError::corrupt("packed time: expected 5 bytes"))?
        .map(u32::from);
    let year = (b[0] << 6) | (b[1] >> 2);
    let month = ((b[1] & 0x03) << 2) | (b[2] >> 6);
    let day = (b[2] >> 1) & 0x1F;
    let hour = ((b[2] & 0x01) << 4) | (b[3] >> 4);
    let minute = ((b[3] & 0x0F) << 2) | (b[4] >> 6);
    let second = b[4] & 0x3F;
    // `year` fits in 14 bits.
    Utc.with_ymd_and_hms(year as i32, month, day, hour, minute, second)
        .single()
        .ok_or_else(|| {
            CodecError::corrupt(format!(
                "invalid packed time {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        })
}

fn unpack_expiry(data: &[u8]) -> CodecResult<Option<DateTime<Utc>>> {
    let at = unpack_time(data)?;
    Ok((at != never()).then_some(at))
}

fn pack_time(at: DateTime<Utc>) -> CodecResult<[u8; 5]> {
    let year = u32::try_from(at.year())
        .ok()
        .filter(|y| *y < 1 << 14)
        .ok_or_else(|| CodecError::encoding(format!("year {} cannot be stored in KDB", at.year())))?;
    let (month, day) = (at.month(), at.day());
    let (hour, minute, second) = (at.hour(), at.minute(), at.second());
    let packed = [
        (year >> 6) & 0xFF,
        ((year & 0x3F) << 2) | ((month >> 2) & 0x03),
        ((month & 0x03) << 6) | ((day & 0x1F) << 1) | ((hour >> 4) & 0x01),
        ((hour & 0x0F) << 4) | ((minute >> 2) & 0x0F),
        ((minute & 0x03) << 6) | (second & 0x3F),
    ];
    // Every component is masked to 8 bits above.
    Ok(packed.map(|v| v as u8))
}

// ----------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------

/// Serialises and encrypts a tree as a KDB file.
pub(crate) fn encode(tree: &Tree, key: &CompositeKey) -> CodecResult<Vec<u8>> {
    if !tree.root().entries().is_empty() {
        return Err(CodecError::encoding(
            "KDB files cannot store entries directly in the root group",
        ));
    }
    let rounds = u32::try_from(tree.meta().transform_rounds).map_err(|_| {
        CodecError::encoding(format!(
            "{} transform rounds exceed the KDB limit",
            tree.meta().transform_rounds
        ))
    })?;

    let mut body = Zeroizing::new(Vec::new());
    let mut file_ids: HashMap<GroupId, u32> = HashMap::new();
    let groups: Vec<&Group> = tree.walk_groups().into_iter().skip(1).collect();
    for (index, group) in groups.iter().enumerate() {
        let file_id = u32::try_from(index + 1).map_err(|_| CodecError::encoding("too many groups"))?;
        let level = u16::try_from(tree.depth(group.id()) - 1)
            .map_err(|_| CodecError::encoding("group nesting too deep"))?;
        file_ids.insert(group.id(), file_id);

        write_field(&mut body, 0x0001, &file_id.to_le_bytes());
        write_string(&mut body, 0x0002, group.name());
        write_times(&mut body, [0x0003, 0x0004, 0x0005, 0x0006], group.times())?;
        write_field(&mut body, 0x0007, &group.icon().to_le_bytes());
        write_field(&mut body, 0x0008, &level.to_le_bytes());
        write_field(&mut body, 0x0009, &0u32.to_le_bytes());
        write_field(&mut body, FIELD_END, &[]);
    }

    let entries = tree.walk_entries();
    for entry in &entries {
        if entry.attachments().len() > 1 {
            return Err(CodecError::encoding(format!(
                "entry {} has {} attachments; KDB stores one",
                entry.id(),
                entry.attachments().len()
            )));
        }
        let group_id = file_ids
            .get(&entry.group())
            .copied()
            .ok_or_else(|| CodecError::encoding(format!("entry {} has no group", entry.id())))?;

        write_field(&mut body, 0x0001, entry.id().as_bytes());
        write_field(&mut body, 0x0002, &group_id.to_le_bytes());
        write_field(&mut body, 0x0003, &entry.icon().to_le_bytes());
        write_string(&mut body, 0x0004, entry.value(TITLE));
        write_string(&mut body, 0x0005, entry.value(URL));
        write_string(&mut body, 0x0006, entry.value(USER_NAME));
        write_string(&mut body, 0x0007, entry.value(PASSWORD));
        write_string(&mut body, 0x0008, entry.value(NOTES));
        write_times(&mut body, [0x0009, 0x000A, 0x000B, 0x000C], entry.times())?;
        match entry.attachments().first() {
            Some(reference) => {
                let binary = tree
                    .attachments()
                    .binary(reference.id)
                    .ok_or_else(|| CodecError::encoding(format!("unknown binary {}", reference.id)))?;
                write_string(&mut body, 0x000D, &reference.name);
                write_field(&mut body, 0x000E, binary.data());
            }
            None => {
                write_string(&mut body, 0x000D, "");
                write_field(&mut body, 0x000E, &[]);
            }
        }
        write_field(&mut body, FIELD_END, &[]);
    }

    let mut rng = rand::thread_rng();
    let mut header = Header {
        flags: FLAG_SHA2 | FLAG_RIJNDAEL,
        version: kdb_format(tree.format()).to_u32(),
        master_seed: [0; 16],
        iv: [0; 16],
        groups: u32::try_from(groups.len()).map_err(|_| CodecError::encoding("too many groups"))?,
        entries: u32::try_from(entries.len()).map_err(|_| CodecError::encoding("too many entries"))?,
        content_hash: Sha256::digest(body.as_slice()).into(),
        transform_seed: [0; 32],
        rounds,
    };
    rng.fill_bytes(&mut header.master_seed);
    rng.fill_bytes(&mut header.iv);
    rng.fill_bytes(&mut header.transform_seed);

    let master = key.master_key(&header.master_seed, &header.transform_seed, rounds.into());
    let mut out = Vec::with_capacity(HEADER_SIZE + body.len() + 16);
    header.write(&mut out);
    out.extend_from_slice(&cipher::encrypt(&master, &header.iv, &body));
    debug!(
        groups = header.groups,
        entries = header.entries,
        bytes = out.len(),
        "KDB database encoded"
    );
    Ok(out)
}

fn kdb_format(format: FormatVersion) -> FormatVersion {
    if format.major == 3 {
        format
    } else {
        DatabaseVersion::V3.file_version()
    }
}

fn write_field(out: &mut Vec<u8>, field_type: u16, data: &[u8]) {
    out.extend_from_slice(&field_type.to_le_bytes());
    // Field payloads come from in-memory strings and binaries.
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

fn write_string(out: &mut Vec<u8>, field_type: u16, value: &str) {
    let mut data = Zeroizing::new(Vec::with_capacity(value.len() + 1));
    data.extend_from_slice(value.as_bytes());
    data.push(0);
    write_field(out, field_type, &data);
}

fn write_times(out: &mut Vec<u8>, types: [u16; 4], times: &Times) -> CodecResult<()> {
    write_field(out, types[0], &pack_time(times.creation)?);
    write_field(out, types[1], &pack_time(times.last_modification)?);
    write_field(out, types[2], &pack_time(times.last_access)?);
    write_field(out, types[3], &pack_time(times.expiry.unwrap_or_else(never))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Credentials;

    fn key(password: &str) -> CompositeKey {
        Credentials::password(password)
            .composite_key(DatabaseVersion::V3)
            .unwrap()
    }

    fn sample() -> Tree {
        let mut tree = Tree::new(DatabaseVersion::V3, ROOT_NAME);
        tree.meta_mut().transform_rounds = 16;
        let root = tree.root_id();
        let internet = tree.add_group(root, Group::new(GroupId::new(), "Internet")).unwrap();
        let mail = tree.add_group(internet, Group::new(GroupId::new(), "Mail")).unwrap();
        let backup = tree.add_group(root, Group::new(GroupId::new(), BACKUP_GROUP)).unwrap();
        tree.set_role(Role::Trash, Some(backup)).unwrap();

        let file = tree.attachments_mut().add_binary(b"attached".to_vec());
        tree.add_entry(
            mail,
            Entry::with_standard_fields(EntryId::new()).with_attachment(BinaryRef::new("a.txt", file)),
        )
        .unwrap();
        tree.add_entry(internet, Entry::with_standard_fields(EntryId::new()))
            .unwrap();
        tree
    }

    #[test]
    fn packed_time_layout() {
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 30).unwrap();
        let packed = pack_time(at).unwrap();
        assert_eq!(unpack_time(&packed).unwrap(), at);
        // Year 2024 = 0b11111101000: top bits land in the first byte.
        assert_eq!(packed[0], (2024u32 >> 6) as u8);
    }

    #[test]
    fn never_expires_maps_to_none() {
        let packed = pack_time(never()).unwrap();
        assert_eq!(unpack_expiry(&packed).unwrap(), None);
    }

    #[test]
    fn invalid_packed_time_is_corrupt() {
        assert!(unpack_time(&[0, 0, 0, 0, 0]).is_err());
        assert!(unpack_time(&[0, 0, 0]).is_err());
    }

    #[test]
    fn decode_normalises_and_is_stable() {
        let bytes = encode(&sample(), &key("pw")).unwrap();
        let first = decode(&bytes, &key("pw")).unwrap();

        assert_eq!(first.group_count(), 4);
        assert_eq!(first.entry_count(), 2);
        assert_eq!(first.root_id(), GroupId::from_bytes([0; 16]));
        let names: Vec<_> = first.walk_groups().iter().map(|g| g.name().to_string()).collect();
        assert_eq!(names, vec![ROOT_NAME, "Internet", "Mail", BACKUP_GROUP]);
        assert_eq!(first.walk_groups()[1].id(), preorder_group_id(1));
        assert_eq!(first.trash(), Some(preorder_group_id(3)));

        let second = decode(&encode(&first, &key("pw")).unwrap(), &key("pw")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn attachment_is_inline() {
        let tree = decode(&encode(&sample(), &key("pw")).unwrap(), &key("pw")).unwrap();
        // Preorder puts the "Internet" entry before the one in "Mail".
        let entries = tree.walk_entries();
        assert!(entries[0].attachments().is_empty());
        let reference = &entries[1].attachments()[0];
        assert_eq!(reference.name, "a.txt");
        assert_eq!(tree.attachments().binary(reference.id).unwrap().data(), b"attached");
    }

    #[test]
    fn wrong_password_is_rejected() {
        let bytes = encode(&sample(), &key("right")).unwrap();
        let err = decode(&bytes, &key("wrong")).unwrap_err();
        assert!(err.is_wrong_credentials());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let mut bytes = encode(&sample(), &key("pw")).unwrap();
        let last = bytes.len() - 20;
        bytes[last] ^= 0x01;
        let err = decode(&bytes, &key("pw")).unwrap_err();
        assert!(err.is_wrong_credentials());
    }

    #[test]
    fn entries_in_root_cannot_be_encoded() {
        let mut tree = sample();
        let root = tree.root_id();
        tree.add_entry(root, Entry::new(EntryId::new())).unwrap();
        assert!(matches!(
            encode(&tree, &key("pw")),
            Err(CodecError::Encoding { .. })
        ));
    }

    #[test]
    fn custom_fields_are_dropped() {
        let mut tree = sample();
        let group = tree.walk_groups()[1].id();
        tree.add_entry(
            group,
            Entry::with_standard_fields(EntryId::new())
                .with_field(StringField::new("PIN", "1234", true)),
        )
        .unwrap();
        let decoded = decode(&encode(&tree, &key("pw")).unwrap(), &key("pw")).unwrap();
        assert!(decoded.walk_entries().iter().all(|e| e.field("PIN").is_none()));
    }

    #[test]
    fn meta_stream_entries_are_skipped() {
        let mut tree = sample();
        let group = tree.walk_groups()[1].id();
        let stream = tree.attachments_mut().add_binary(vec![1, 2, 3]);
        tree.add_entry(
            group,
            Entry::new(EntryId::new())
                .with_field(StringField::new(TITLE, "Meta-Info", false))
                .with_field(StringField::new(USER_NAME, "SYSTEM", false))
                .with_field(StringField::new(URL, "$", false))
                .with_attachment(BinaryRef::new("bin-stream", stream)),
        )
        .unwrap();

        let decoded = decode(&encode(&tree, &key("pw")).unwrap(), &key("pw")).unwrap();
        assert_eq!(decoded.entry_count(), 2);
    }
}
