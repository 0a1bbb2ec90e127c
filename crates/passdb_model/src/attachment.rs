//! Deduplicated attachment storage.

use crate::error::{ModelError, ModelResult};
use crate::id::BinaryId;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Raw attachment content.
#[derive(Clone, PartialEq, Eq)]
pub struct Binary {
    data: Vec<u8>,
    compressed: bool,
}

impl Binary {
    /// Creates a binary. `compressed` records whether the content should be
    /// stored gzip-compressed in the file.
    #[must_use]
    pub fn new(data: Vec<u8>, compressed: bool) -> Self {
        Self { data, compressed }
    }

    /// Returns the content.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns true if the content is stored compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    fn digest(&self) -> [u8; 32] {
        Sha256::digest(&self.data).into()
    }
}

impl std::fmt::Debug for Binary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binary")
            .field("len", &self.data.len())
            .field("compressed", &self.compressed)
            .finish()
    }
}

/// An entry's pointer to a stored binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryRef {
    /// Display file name.
    pub name: String,
    /// Id of the binary in the attachment store.
    pub id: BinaryId,
}

impl BinaryRef {
    /// Creates a reference.
    pub fn new(name: impl Into<String>, id: BinaryId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// Binary blobs addressed by small integer ids.
///
/// - Ids increase monotonically and are never handed out twice while the
///   store lives; only [`release`](Self::release) renumbers.
/// - Adding content identical to an existing binary returns the existing id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentStore {
    binaries: BTreeMap<BinaryId, Binary>,
    by_digest: HashMap<[u8; 32], BinaryId>,
    next_id: u32,
}

impl AttachmentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data`, returning the id of an identical existing binary if
    /// there is one.
    pub fn add_binary(&mut self, data: Vec<u8>) -> BinaryId {
        self.add(Binary::new(data, true))
    }

    /// Stores a binary, deduplicating by content.
    pub fn add(&mut self, binary: Binary) -> BinaryId {
        let digest = binary.digest();
        if let Some(&existing) = self.by_digest.get(&digest) {
            debug!(id = %existing, "attachment content already stored");
            return existing;
        }
        let id = BinaryId::new(self.next_id);
        self.next_id += 1;
        self.by_digest.insert(digest, id);
        self.binaries.insert(id, binary);
        id
    }

    /// Stores a binary under an explicit id, as read from a file pool.
    ///
    /// Duplicate content under a second id is kept as-is so references in
    /// the file stay valid.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateId`] if the id is taken.
    pub fn insert_with_id(&mut self, id: BinaryId, binary: Binary) -> ModelResult<()> {
        if self.binaries.contains_key(&id) {
            return Err(ModelError::DuplicateId(id.to_string()));
        }
        self.by_digest.entry(binary.digest()).or_insert(id);
        self.binaries.insert(id, binary);
        self.next_id = self.next_id.max(id.as_u32() + 1);
        Ok(())
    }

    /// Returns the id of a stored binary with exactly this content.
    #[must_use]
    pub fn find(&self, data: &[u8]) -> Option<BinaryId> {
        let digest: [u8; 32] = Sha256::digest(data).into();
        self.by_digest.get(&digest).copied()
    }

    /// Takes a binary out of the store.
    ///
    /// Removing the most recently assigned id hands it out again next time,
    /// so an add followed by a remove leaves the store as it was.
    pub(crate) fn remove(&mut self, id: BinaryId) -> Option<Binary> {
        let binary = self.binaries.remove(&id)?;
        let digest = binary.digest();
        if self.by_digest.get(&digest) == Some(&id) {
            self.by_digest.remove(&digest);
            let other = self
                .binaries
                .iter()
                .find(|(_, b)| b.digest() == digest)
                .map(|(other, _)| *other);
            if let Some(other) = other {
                self.by_digest.insert(digest, other);
            }
        }
        if id.as_u32() + 1 == self.next_id {
            self.next_id = id.as_u32();
        }
        Some(binary)
    }

    /// Returns the binary with the given id.
    #[must_use]
    pub fn binary(&self, id: BinaryId) -> Option<&Binary> {
        self.binaries.get(&id)
    }

    /// Returns true if the id is stored.
    #[must_use]
    pub fn contains(&self, id: BinaryId) -> bool {
        self.binaries.contains_key(&id)
    }

    /// The id the next new binary will receive.
    #[must_use]
    pub fn next_id(&self) -> BinaryId {
        BinaryId::new(self.next_id)
    }

    /// Number of stored binaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.binaries.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty()
    }

    /// Iterates binaries in id order.
    pub fn iter(&self) -> impl Iterator<Item = (BinaryId, &Binary)> {
        self.binaries.iter().map(|(id, b)| (*id, b))
    }

    /// Drops every binary not in `live` and renumbers the survivors
    /// contiguously from zero, keeping their relative order.
    ///
    /// Returns the old-to-new id mapping for every survivor. Callers must
    /// rewrite all references with it.
    pub(crate) fn release(&mut self, live: &BTreeSet<BinaryId>) -> BTreeMap<BinaryId, BinaryId> {
        let old = std::mem::take(&mut self.binaries);
        self.by_digest.clear();
        self.next_id = 0;

        let mut remap = BTreeMap::new();
        for (old_id, binary) in old {
            if !live.contains(&old_id) {
                continue;
            }
            let new_id = BinaryId::new(self.next_id);
            self.next_id += 1;
            self.by_digest.entry(binary.digest()).or_insert(new_id);
            self.binaries.insert(new_id, binary);
            remap.insert(old_id, new_id);
        }
        remap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let mut store = AttachmentStore::new();
        assert_eq!(store.add_binary(b"a".to_vec()), BinaryId::new(0));
        assert_eq!(store.add_binary(b"b".to_vec()), BinaryId::new(1));
        assert_eq!(store.next_id(), BinaryId::new(2));
    }

    #[test]
    fn identical_content_is_deduplicated() {
        let mut store = AttachmentStore::new();
        let first = store.add_binary(b"same".to_vec());
        let second = store.add_binary(b"same".to_vec());
        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.next_id(), BinaryId::new(1));
    }

    #[test]
    fn release_renumbers_contiguously() {
        let mut store = AttachmentStore::new();
        let a = store.add_binary(b"a".to_vec());
        let b = store.add_binary(b"b".to_vec());
        let c = store.add_binary(b"c".to_vec());

        let live: BTreeSet<_> = [a, c].into_iter().collect();
        let remap = store.release(&live);

        assert_eq!(store.len(), 2);
        assert_eq!(remap.get(&a), Some(&BinaryId::new(0)));
        assert_eq!(remap.get(&c), Some(&BinaryId::new(1)));
        assert!(!remap.contains_key(&b));
        assert_eq!(store.binary(BinaryId::new(1)).unwrap().data(), b"c");
        assert_eq!(store.next_id(), BinaryId::new(2));
    }

    #[test]
    fn released_content_can_be_added_again() {
        let mut store = AttachmentStore::new();
        let a = store.add_binary(b"gone".to_vec());
        store.release(&BTreeSet::new());
        assert!(!store.contains(a));
        assert_eq!(store.add_binary(b"gone".to_vec()), BinaryId::new(0));
    }

    #[test]
    fn removing_latest_rewinds_next_id() {
        let mut store = AttachmentStore::new();
        let before = store.clone();
        let id = store.add_binary(b"undo me".to_vec());
        assert_eq!(store.find(b"undo me"), Some(id));

        assert!(store.remove(id).is_some());
        assert_eq!(store, before);
        assert_eq!(store.find(b"undo me"), None);
    }

    #[test]
    fn insert_with_id_tracks_next() {
        let mut store = AttachmentStore::new();
        store
            .insert_with_id(BinaryId::new(4), Binary::new(b"x".to_vec(), false))
            .unwrap();
        assert_eq!(store.next_id(), BinaryId::new(5));
        assert!(store
            .insert_with_id(BinaryId::new(4), Binary::new(b"y".to_vec(), false))
            .is_err());
    }
}
