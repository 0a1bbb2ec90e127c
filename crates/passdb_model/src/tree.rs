//! The group/entry tree.
//!
//! Groups and entries live in id-keyed arenas; a group stores the ordered
//! ids of its children and its parent id. Only items reachable from the
//! root are kept in the arenas: detaching a subtree removes it and hands
//! it back to the caller as a [`GroupSubtree`].
//!
//! ## Invariants
//!
//! - The root has no parent and is never moved, detached or given a role
//! - Every other item is listed exactly once by its parent
//! - No group is its own ancestor
//! - At most one group holds each [`Role`]
//! - String field keys are unique per entry
//! - Every [`BinaryRef`] points into the attachment store

use crate::attachment::{AttachmentStore, Binary, BinaryRef};
use crate::entry::Entry;
use crate::error::{ModelError, ModelResult};
use crate::field::StringField;
use crate::group::{Group, Role};
use crate::id::{BinaryId, EntryId, GroupId};
use crate::meta::{DatabaseVersion, FormatVersion, Meta};
use crate::times::Times;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// A group detached from the tree together with everything below it.
///
/// Groups are kept in preorder, the first one being the subtree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSubtree {
    groups: Vec<Group>,
    entries: Vec<Entry>,
}

impl GroupSubtree {
    /// Wraps a fresh group with no children.
    #[must_use]
    pub fn single(mut group: Group) -> Self {
        group.groups.clear();
        group.entries.clear();
        group.trash = false;
        group.template = false;
        Self {
            groups: vec![group],
            entries: Vec::new(),
        }
    }

    /// Id of the subtree root.
    #[must_use]
    pub fn root(&self) -> GroupId {
        self.groups[0].id
    }

    /// Groups in preorder.
    #[must_use]
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// All entries of the subtree.
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Binary ids referenced anywhere in the subtree.
    #[must_use]
    pub fn binary_ids(&self) -> BTreeSet<BinaryId> {
        self.entries
            .iter()
            .flat_map(|e| e.attachments.iter().map(|r| r.id))
            .collect()
    }
}

/// Outcome of releasing unreferenced binaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Number of binaries dropped.
    pub released: usize,
    /// Old-to-new id of every surviving binary.
    pub remap: BTreeMap<BinaryId, BinaryId>,
}

/// The in-memory database: metadata, a root group and attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    version: DatabaseVersion,
    format: FormatVersion,
    meta: Meta,
    root: GroupId,
    groups: HashMap<GroupId, Group>,
    entries: HashMap<EntryId, Entry>,
    attachments: AttachmentStore,
}

impl Tree {
    /// Creates a tree holding only a root group.
    #[must_use]
    pub fn new(version: DatabaseVersion, root_name: &str) -> Self {
        Self::with_root(version, Group::new(GroupId::new(), root_name))
    }

    /// Creates a tree around the given root group.
    ///
    /// Children and role flags of `root` are discarded.
    #[must_use]
    pub fn with_root(version: DatabaseVersion, mut root: Group) -> Self {
        root.parent = None;
        root.groups.clear();
        root.entries.clear();
        root.trash = false;
        root.template = false;
        let id = root.id;
        let mut groups = HashMap::new();
        groups.insert(id, root);
        Self {
            version,
            format: version.file_version(),
            meta: Meta::default(),
            root: id,
            groups,
            entries: HashMap::new(),
            attachments: AttachmentStore::new(),
        }
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// The on-disk layout.
    #[must_use]
    pub fn version(&self) -> DatabaseVersion {
        self.version
    }

    /// The file version read from (or to be written to) the header.
    #[must_use]
    pub fn format(&self) -> FormatVersion {
        self.format
    }

    /// Sets the header file version.
    pub fn set_format(&mut self, format: FormatVersion) {
        self.format = format;
    }

    /// Database settings.
    #[must_use]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Mutable database settings.
    pub fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    /// The attachment store.
    #[must_use]
    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    /// Mutable attachment store, for adding content.
    pub fn attachments_mut(&mut self) -> &mut AttachmentStore {
        &mut self.attachments
    }

    // ------------------------------------------------------------------
    // Lookup and traversal
    // ------------------------------------------------------------------

    /// Id of the root group.
    #[must_use]
    pub fn root_id(&self) -> GroupId {
        self.root
    }

    /// The root group.
    #[must_use]
    pub fn root(&self) -> &Group {
        &self.groups[&self.root]
    }

    /// Finds a live group.
    #[must_use]
    pub fn find_group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// Finds a live entry.
    #[must_use]
    pub fn find_entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    /// Like [`find_group`](Self::find_group) but as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::GroupNotFound`].
    pub fn group(&self, id: GroupId) -> ModelResult<&Group> {
        self.groups.get(&id).ok_or(ModelError::GroupNotFound(id))
    }

    /// Like [`find_entry`](Self::find_entry) but as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::EntryNotFound`].
    pub fn entry(&self, id: EntryId) -> ModelResult<&Entry> {
        self.entries.get(&id).ok_or(ModelError::EntryNotFound(id))
    }

    /// Number of groups including the root.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Groups of the whole tree in depth-first preorder, root first.
    #[must_use]
    pub fn walk_groups(&self) -> Vec<&Group> {
        self.walk_from(self.root)
    }

    /// Entries of the whole tree, grouped by owner in group preorder.
    #[must_use]
    pub fn walk_entries(&self) -> Vec<&Entry> {
        self.walk_groups()
            .into_iter()
            .flat_map(|g| g.entries.iter().map(|id| &self.entries[id]))
            .collect()
    }

    /// Depth of a group below the root (root is 0).
    #[must_use]
    pub fn depth(&self, id: GroupId) -> usize {
        self.ancestors(id).count()
    }

    fn walk_from(&self, start: GroupId) -> Vec<&Group> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if let Some(group) = self.groups.get(&id) {
                out.push(group);
                stack.extend(group.groups.iter().rev().copied());
            }
        }
        out
    }

    /// Iterates the strict ancestors of a group, nearest first.
    fn ancestors(&self, id: GroupId) -> impl Iterator<Item = GroupId> + '_ {
        let mut current = self.groups.get(&id).and_then(|g| g.parent);
        std::iter::from_fn(move || {
            let next = current?;
            current = self.groups.get(&next).and_then(|g| g.parent);
            Some(next)
        })
    }

    /// Returns true if `ancestor` is a strict ancestor of `group`.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: GroupId, group: GroupId) -> bool {
        self.ancestors(group).any(|a| a == ancestor)
    }

    /// Returns true if `ancestor` is `group` or one of its ancestors.
    #[must_use]
    pub fn is_same_or_ancestor(&self, ancestor: GroupId, group: GroupId) -> bool {
        ancestor == group || self.ancestors(group).any(|a| a == ancestor)
    }

    // ------------------------------------------------------------------
    // Roles and trash
    // ------------------------------------------------------------------

    /// The group holding `role`, if any.
    #[must_use]
    pub fn role_holder(&self, role: Role) -> Option<GroupId> {
        self.groups
            .values()
            .find(|g| g.has_role(role))
            .map(|g| g.id)
    }

    /// The trash group, if any.
    #[must_use]
    pub fn trash(&self) -> Option<GroupId> {
        self.role_holder(Role::Trash)
    }

    /// The template group, if any.
    #[must_use]
    pub fn template(&self) -> Option<GroupId> {
        self.role_holder(Role::Template)
    }

    /// Returns true if the group is the trash group or inside it.
    #[must_use]
    pub fn is_group_trashed(&self, id: GroupId) -> bool {
        match self.trash() {
            Some(trash) => self.is_same_or_ancestor(trash, id),
            None => false,
        }
    }

    /// Returns true if the entry sits inside the trash group's subtree.
    #[must_use]
    pub fn is_entry_trashed(&self, id: EntryId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|e| self.is_group_trashed(e.group))
    }

    /// Gives `role` to `group`, or clears it with `None`.
    ///
    /// A previous holder is silently demoted. Returns the previous holder.
    ///
    /// # Errors
    ///
    /// Fails if the group is unknown or is the root.
    pub fn set_role(&mut self, role: Role, group: Option<GroupId>) -> ModelResult<Option<GroupId>> {
        if let Some(id) = group {
            if id == self.root {
                return Err(ModelError::RootImmutable);
            }
            self.group(id)?;
        }

        let previous = self.role_holder(role);
        if previous == group {
            return Ok(previous);
        }
        if let Some(prev) = previous {
            debug!(?role, demoted = %prev, "role reassigned, demoting previous holder");
            if let Some(g) = self.groups.get_mut(&prev) {
                g.set_role_flag(role, false);
            }
        }
        if let Some(id) = group {
            if let Some(g) = self.groups.get_mut(&id) {
                g.set_role_flag(role, true);
            }
        }
        Ok(previous)
    }

    // ------------------------------------------------------------------
    // Building (decoders)
    // ------------------------------------------------------------------

    /// Appends a new leaf group under `parent`.
    ///
    /// # Errors
    ///
    /// Fails if the parent is unknown or the id is taken.
    pub fn add_group(&mut self, parent: GroupId, group: Group) -> ModelResult<GroupId> {
        let id = group.id;
        let len = self.group(parent)?.groups.len();
        self.insert_subtree(parent, len, GroupSubtree::single(group))?;
        Ok(id)
    }

    /// Appends an entry to `group`.
    ///
    /// # Errors
    ///
    /// Fails if the group is unknown, the id is taken, field keys repeat
    /// or an attachment reference is dangling.
    pub fn add_entry(&mut self, group: GroupId, entry: Entry) -> ModelResult<EntryId> {
        let id = entry.id;
        let len = self.group(group)?.entries.len();
        self.insert_entry(group, len, entry)?;
        Ok(id)
    }

    /// Checks every invariant over the whole tree.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> ModelResult<()> {
        let root = self.group(self.root)?;
        if root.parent.is_some() {
            return Err(ModelError::inconsistent("root group has a parent"));
        }
        if root.trash || root.template {
            return Err(ModelError::RootImmutable);
        }

        let reachable = self.walk_groups();
        if reachable.len() != self.groups.len() {
            return Err(ModelError::inconsistent(format!(
                "{} of {} groups unreachable from root",
                self.groups.len() - reachable.len(),
                self.groups.len()
            )));
        }

        let mut seen_entries = HashSet::new();
        for group in &reachable {
            for child in &group.groups {
                if self.groups[child].parent != Some(group.id) {
                    return Err(ModelError::inconsistent(format!(
                        "group {child} listed under {} but points elsewhere",
                        group.id
                    )));
                }
            }
            for entry_id in &group.entries {
                let entry = self.entry(*entry_id)?;
                if entry.group != group.id || !seen_entries.insert(*entry_id) {
                    return Err(ModelError::inconsistent(format!(
                        "entry {entry_id} has inconsistent membership"
                    )));
                }
            }
        }
        if seen_entries.len() != self.entries.len() {
            return Err(ModelError::inconsistent("entries outside the tree"));
        }

        for role in [Role::Trash, Role::Template] {
            let holders = self.groups.values().filter(|g| g.has_role(role)).count();
            if holders > 1 {
                return Err(ModelError::inconsistent(format!(
                    "{holders} groups hold the {role:?} role"
                )));
            }
        }

        for entry in self.entries.values() {
            if let Some(key) = entry.has_duplicate_keys() {
                return Err(ModelError::DuplicateField {
                    key: key.to_string(),
                });
            }
            for reference in &entry.attachments {
                if !self.attachments.contains(reference.id) {
                    return Err(ModelError::UnknownReference(reference.id));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structural primitives
    // ------------------------------------------------------------------

    /// Inserts a detached subtree as child `index` of `parent`.
    ///
    /// # Errors
    ///
    /// Fails if the parent is unknown, the index is out of range, any id
    /// is already live, a reference is dangling or a role would be held
    /// twice.
    pub fn insert_subtree(
        &mut self,
        parent: GroupId,
        index: usize,
        subtree: GroupSubtree,
    ) -> ModelResult<()> {
        let len = self.group(parent)?.groups.len();
        if index > len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }
        for group in &subtree.groups {
            if self.groups.contains_key(&group.id) {
                return Err(ModelError::DuplicateId(group.id.to_string()));
            }
        }
        for entry in &subtree.entries {
            if self.entries.contains_key(&entry.id) {
                return Err(ModelError::DuplicateId(entry.id.to_string()));
            }
            self.check_entry_payload(entry)?;
        }
        for role in [Role::Trash, Role::Template] {
            if subtree.groups.iter().any(|g| g.has_role(role)) && self.role_holder(role).is_some()
            {
                return Err(ModelError::inconsistent(format!(
                    "{role:?} role already held"
                )));
            }
        }

        let GroupSubtree { mut groups, entries } = subtree;
        let root_id = groups[0].id;
        groups[0].parent = Some(parent);
        for group in groups {
            self.groups.insert(group.id, group);
        }
        for entry in entries {
            self.entries.insert(entry.id, entry);
        }
        self.groups
            .get_mut(&parent)
            .ok_or(ModelError::GroupNotFound(parent))?
            .groups
            .insert(index, root_id);
        Ok(())
    }

    /// Removes a group and everything below it from the tree.
    ///
    /// Returns the former parent, the former position and the subtree.
    ///
    /// # Errors
    ///
    /// Fails for the root or an unknown group.
    pub fn detach_group(&mut self, id: GroupId) -> ModelResult<(GroupId, usize, GroupSubtree)> {
        if id == self.root {
            return Err(ModelError::RootImmutable);
        }
        let parent = self.group(id)?.parent.ok_or(ModelError::RootImmutable)?;
        let index = self.child_group_index(parent, id)?;

        let ids: Vec<GroupId> = self.walk_from(id).iter().map(|g| g.id).collect();
        let mut groups = Vec::with_capacity(ids.len());
        let mut entries = Vec::new();
        for group_id in ids {
            if let Some(group) = self.groups.remove(&group_id) {
                for entry_id in &group.entries {
                    if let Some(entry) = self.entries.remove(entry_id) {
                        entries.push(entry);
                    }
                }
                groups.push(group);
            }
        }
        if let Some(p) = self.groups.get_mut(&parent) {
            p.groups.remove(index);
        }
        Ok((parent, index, GroupSubtree { groups, entries }))
    }

    /// Moves a group to position `index` among the children of `parent`.
    ///
    /// `index` is interpreted after the group has been taken out of its
    /// current position. Returns the former parent and position.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidReparent`] if `parent` is the group
    /// itself or one of its descendants.
    pub fn move_group(
        &mut self,
        id: GroupId,
        parent: GroupId,
        index: usize,
    ) -> ModelResult<(GroupId, usize)> {
        if id == self.root {
            return Err(ModelError::RootImmutable);
        }
        let old_parent = self.group(id)?.parent.ok_or(ModelError::RootImmutable)?;
        self.group(parent)?;
        if self.is_same_or_ancestor(id, parent) {
            return Err(ModelError::InvalidReparent {
                group: id,
                target: parent,
            });
        }
        let old_index = self.child_group_index(old_parent, id)?;
        let len_after = self.groups[&parent].groups.len() - usize::from(parent == old_parent);
        if index > len_after {
            return Err(ModelError::IndexOutOfRange {
                index,
                len: len_after,
            });
        }

        if let Some(p) = self.groups.get_mut(&old_parent) {
            p.groups.remove(old_index);
        }
        if let Some(p) = self.groups.get_mut(&parent) {
            p.groups.insert(index, id);
        }
        if let Some(g) = self.groups.get_mut(&id) {
            g.parent = Some(parent);
        }
        Ok((old_parent, old_index))
    }

    /// Inserts a detached entry at position `index` of `group`.
    ///
    /// # Errors
    ///
    /// Fails if the group is unknown, the index is out of range, the id is
    /// live, field keys repeat or a reference is dangling.
    pub fn insert_entry(&mut self, group: GroupId, index: usize, mut entry: Entry) -> ModelResult<()> {
        let len = self.group(group)?.entries.len();
        if index > len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }
        if self.entries.contains_key(&entry.id) {
            return Err(ModelError::DuplicateId(entry.id.to_string()));
        }
        self.check_entry_payload(&entry)?;

        entry.group = group;
        let id = entry.id;
        self.entries.insert(id, entry);
        if let Some(g) = self.groups.get_mut(&group) {
            g.entries.insert(index, id);
        }
        Ok(())
    }

    /// Removes an entry from the tree.
    ///
    /// Returns the former group, the former position and the entry.
    ///
    /// # Errors
    ///
    /// Fails for an unknown entry.
    pub fn detach_entry(&mut self, id: EntryId) -> ModelResult<(GroupId, usize, Entry)> {
        let group = self.entry(id)?.group;
        let index = self.entry_index(group, id)?;
        if let Some(g) = self.groups.get_mut(&group) {
            g.entries.remove(index);
        }
        let entry = self.entries.remove(&id).ok_or(ModelError::EntryNotFound(id))?;
        Ok((group, index, entry))
    }

    /// Moves an entry to position `index` of `group`.
    ///
    /// `index` is interpreted after the entry has been taken out of its
    /// current position. Returns the former group and position.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids or an out-of-range index.
    pub fn move_entry(
        &mut self,
        id: EntryId,
        group: GroupId,
        index: usize,
    ) -> ModelResult<(GroupId, usize)> {
        let old_group = self.entry(id)?.group;
        let target_len = self.group(group)?.entries.len();
        let old_index = self.entry_index(old_group, id)?;
        let len_after = target_len - usize::from(group == old_group);
        if index > len_after {
            return Err(ModelError::IndexOutOfRange {
                index,
                len: len_after,
            });
        }

        if let Some(g) = self.groups.get_mut(&old_group) {
            g.entries.remove(old_index);
        }
        if let Some(g) = self.groups.get_mut(&group) {
            g.entries.insert(index, id);
        }
        if let Some(e) = self.entries.get_mut(&id) {
            e.group = group;
        }
        Ok((old_group, old_index))
    }

    /// Inserts a string field at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateField`] if the key exists.
    pub fn insert_field(&mut self, entry: EntryId, index: usize, field: StringField) -> ModelResult<()> {
        let e = self.entry(entry)?;
        let len = e.fields.len();
        if index > len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }
        if e.field(field.key()).is_some() {
            return Err(ModelError::DuplicateField {
                key: field.key().to_string(),
            });
        }
        self.entry_mut(entry)?.fields.insert(index, field);
        Ok(())
    }

    /// Removes the string field at `index`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown entry or out-of-range index.
    pub fn remove_field(&mut self, entry: EntryId, index: usize) -> ModelResult<StringField> {
        let len = self.entry(entry)?.fields.len();
        if index >= len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }
        Ok(self.entry_mut(entry)?.fields.remove(index))
    }

    /// Replaces the string field at `index`, returning the old one.
    ///
    /// # Errors
    ///
    /// Fails if the new key collides with another field.
    pub fn replace_field(
        &mut self,
        entry: EntryId,
        index: usize,
        field: StringField,
    ) -> ModelResult<StringField> {
        let e = self.entry(entry)?;
        let len = e.fields.len();
        if index >= len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }
        if e
            .fields
            .iter()
            .enumerate()
            .any(|(i, f)| i != index && f.key() == field.key())
        {
            return Err(ModelError::DuplicateField {
                key: field.key().to_string(),
            });
        }
        let slot = &mut self.entry_mut(entry)?.fields[index];
        Ok(std::mem::replace(slot, field))
    }

    /// Inserts an attachment reference at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownReference`] if the binary is missing.
    pub fn insert_attachment(
        &mut self,
        entry: EntryId,
        index: usize,
        reference: BinaryRef,
    ) -> ModelResult<()> {
        let len = self.entry(entry)?.attachments.len();
        if index > len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }
        if !self.attachments.contains(reference.id) {
            return Err(ModelError::UnknownReference(reference.id));
        }
        self.entry_mut(entry)?.attachments.insert(index, reference);
        Ok(())
    }

    /// Removes the attachment reference at `index`.
    ///
    /// The binary itself stays in the store until released.
    ///
    /// # Errors
    ///
    /// Fails for an unknown entry or out-of-range index.
    pub fn remove_attachment(&mut self, entry: EntryId, index: usize) -> ModelResult<BinaryRef> {
        let len = self.entry(entry)?.attachments.len();
        if index >= len {
            return Err(ModelError::IndexOutOfRange { index, len });
        }
        Ok(self.entry_mut(entry)?.attachments.remove(index))
    }

    /// Renames a group, returning the old name.
    ///
    /// # Errors
    ///
    /// Fails for an unknown group.
    pub fn rename_group(&mut self, id: GroupId, name: String) -> ModelResult<String> {
        let group = self.group_mut(id)?;
        Ok(std::mem::replace(&mut group.name, name))
    }

    /// Sets a group's icon, returning the old one.
    ///
    /// # Errors
    ///
    /// Fails for an unknown group.
    pub fn set_group_icon(&mut self, id: GroupId, icon: u32) -> ModelResult<u32> {
        let group = self.group_mut(id)?;
        Ok(std::mem::replace(&mut group.icon, icon))
    }

    /// Sets a group's timestamps, returning the old ones.
    ///
    /// # Errors
    ///
    /// Fails for an unknown group.
    pub fn set_group_times(&mut self, id: GroupId, times: Times) -> ModelResult<Times> {
        let group = self.group_mut(id)?;
        Ok(std::mem::replace(&mut group.times, times))
    }

    /// Sets an entry's icon, returning the old one.
    ///
    /// # Errors
    ///
    /// Fails for an unknown entry.
    pub fn set_entry_icon(&mut self, id: EntryId, icon: u32) -> ModelResult<u32> {
        let entry = self.entry_mut(id)?;
        Ok(std::mem::replace(&mut entry.icon, icon))
    }

    /// Sets an entry's timestamps, returning the old ones.
    ///
    /// # Errors
    ///
    /// Fails for an unknown entry.
    pub fn set_entry_times(&mut self, id: EntryId, times: Times) -> ModelResult<Times> {
        let entry = self.entry_mut(id)?;
        Ok(std::mem::replace(&mut entry.times, times))
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    /// Binary ids referenced by live entries.
    #[must_use]
    pub fn live_binary_ids(&self) -> BTreeSet<BinaryId> {
        self.entries
            .values()
            .flat_map(|e| e.attachments.iter().map(|r| r.id))
            .collect()
    }

    /// Puts a binary into the store under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateId`] if the id is taken.
    pub fn insert_binary(&mut self, id: BinaryId, binary: Binary) -> ModelResult<()> {
        self.attachments.insert_with_id(id, binary)
    }

    /// Takes an unreferenced binary out of the store.
    ///
    /// # Errors
    ///
    /// Fails if the binary is missing or an entry still references it.
    pub fn remove_binary(&mut self, id: BinaryId) -> ModelResult<Binary> {
        if !self.attachments.contains(id) {
            return Err(ModelError::UnknownReference(id));
        }
        if self.live_binary_ids().contains(&id) {
            return Err(ModelError::inconsistent(format!("binary {id} is still referenced")));
        }
        self.attachments.remove(id).ok_or(ModelError::UnknownReference(id))
    }

    /// Drops binaries no live entry references and renumbers the rest
    /// contiguously, rewriting every reference.
    ///
    /// Either all references are rewritten or, on error, none are.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownReference`] if a live reference already
    /// dangles.
    pub fn release_unreferenced(&mut self) -> ModelResult<ReleaseReport> {
        let live = self.live_binary_ids();
        if let Some(missing) = live.iter().find(|id| !self.attachments.contains(**id)) {
            return Err(ModelError::UnknownReference(*missing));
        }

        let before = self.attachments.len();
        let remap = self.attachments.release(&live);
        for entry in self.entries.values_mut() {
            for reference in &mut entry.attachments {
                // Every live id is in the remap: checked above.
                if let Some(new_id) = remap.get(&reference.id) {
                    reference.id = *new_id;
                }
            }
        }
        let released = before - self.attachments.len();
        debug!(released, kept = self.attachments.len(), "released unreferenced binaries");
        Ok(ReleaseReport { released, remap })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn group_mut(&mut self, id: GroupId) -> ModelResult<&mut Group> {
        self.groups.get_mut(&id).ok_or(ModelError::GroupNotFound(id))
    }

    fn entry_mut(&mut self, id: EntryId) -> ModelResult<&mut Entry> {
        self.entries.get_mut(&id).ok_or(ModelError::EntryNotFound(id))
    }

    fn child_group_index(&self, parent: GroupId, child: GroupId) -> ModelResult<usize> {
        self.group(parent)?
            .groups
            .iter()
            .position(|g| *g == child)
            .ok_or_else(|| ModelError::inconsistent(format!("{child} missing from its parent")))
    }

    fn entry_index(&self, group: GroupId, entry: EntryId) -> ModelResult<usize> {
        self.group(group)?
            .entries
            .iter()
            .position(|e| *e == entry)
            .ok_or_else(|| ModelError::inconsistent(format!("{entry} missing from its group")))
    }

    fn check_entry_payload(&self, entry: &Entry) -> ModelResult<()> {
        if let Some(key) = entry.has_duplicate_keys() {
            return Err(ModelError::DuplicateField {
                key: key.to_string(),
            });
        }
        for reference in &entry.attachments {
            if !self.attachments.contains(reference.id) {
                return Err(ModelError::UnknownReference(reference.id));
            }
        }
        Ok(())
    }
}
