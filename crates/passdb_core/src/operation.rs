//! Reversible tree operations.
//!
//! An [`Operation`] is one structural primitive together with everything
//! needed to perform it. Applying an operation returns its exact inverse,
//! so undo and redo are both just "apply the stored operations".
//!
//! Items are referenced by id, never by pointer: an inverse stays valid
//! however the tree changes between do and undo, as long as history is
//! replayed in order.

use crate::events::ChangeEvent;
use passdb_model::{
    Binary, BinaryId, BinaryRef, Entry, EntryId, GroupId, GroupSubtree, ModelResult, Role,
    StringField, Times, Tree,
};
use tracing::warn;

/// A single reversible change to a [`Tree`].
#[derive(Debug, Clone)]
pub enum Operation {
    /// Insert a detached group subtree.
    InsertGroup {
        /// New parent.
        parent: GroupId,
        /// Position among the parent's child groups.
        index: usize,
        /// The subtree to insert.
        subtree: GroupSubtree,
    },
    /// Detach a group and everything below it.
    DetachGroup {
        /// The group.
        group: GroupId,
    },
    /// Move a group.
    MoveGroup {
        /// The group.
        group: GroupId,
        /// New parent.
        parent: GroupId,
        /// Position after removal from the old place.
        index: usize,
    },
    /// Insert a detached entry.
    InsertEntry {
        /// Owning group.
        group: GroupId,
        /// Position among the group's entries.
        index: usize,
        /// The entry.
        entry: Entry,
    },
    /// Detach an entry.
    DetachEntry {
        /// The entry.
        entry: EntryId,
    },
    /// Move an entry.
    MoveEntry {
        /// The entry.
        entry: EntryId,
        /// New group.
        group: GroupId,
        /// Position after removal from the old place.
        index: usize,
    },
    /// Insert a string field.
    InsertField {
        /// The entry.
        entry: EntryId,
        /// Position among the entry's fields.
        index: usize,
        /// The field.
        field: StringField,
    },
    /// Remove a string field.
    RemoveField {
        /// The entry.
        entry: EntryId,
        /// Position of the field.
        index: usize,
    },
    /// Replace a string field in place.
    ReplaceField {
        /// The entry.
        entry: EntryId,
        /// Position of the field.
        index: usize,
        /// The new field.
        field: StringField,
    },
    /// Put a binary into the attachment store.
    InsertBinary {
        /// Id to store it under.
        id: BinaryId,
        /// The content.
        binary: Binary,
    },
    /// Take an unreferenced binary out of the attachment store.
    RemoveBinary {
        /// The binary.
        id: BinaryId,
    },
    /// Insert an attachment reference.
    InsertAttachment {
        /// The entry.
        entry: EntryId,
        /// Position among the entry's attachments.
        index: usize,
        /// The reference.
        reference: BinaryRef,
    },
    /// Remove an attachment reference.
    RemoveAttachment {
        /// The entry.
        entry: EntryId,
        /// Position of the reference.
        index: usize,
    },
    /// Rename a group.
    RenameGroup {
        /// The group.
        group: GroupId,
        /// New name.
        name: String,
    },
    /// Change a group's icon.
    SetGroupIcon {
        /// The group.
        group: GroupId,
        /// New icon id.
        icon: u32,
    },
    /// Change a group's timestamps.
    SetGroupTimes {
        /// The group.
        group: GroupId,
        /// New times.
        times: Times,
    },
    /// Change an entry's icon.
    SetEntryIcon {
        /// The entry.
        entry: EntryId,
        /// New icon id.
        icon: u32,
    },
    /// Change an entry's timestamps.
    SetEntryTimes {
        /// The entry.
        entry: EntryId,
        /// New times.
        times: Times,
    },
    /// Assign a role, demoting the previous holder.
    SetRole {
        /// The role.
        role: Role,
        /// New holder, or `None` to clear.
        group: Option<GroupId>,
    },
}

impl Operation {
    /// Applies the operation, returning its inverse and the event it
    /// causes.
    ///
    /// # Errors
    ///
    /// Returns the model error if the operation is not valid for the
    /// current tree. The tree is unchanged in that case.
    pub fn apply(self, tree: &mut Tree) -> ModelResult<(Operation, Option<ChangeEvent>)> {
        Ok(match self {
            Operation::InsertGroup {
                parent,
                index,
                subtree,
            } => {
                let group = subtree.root();
                tree.insert_subtree(parent, index, subtree)?;
                (
                    Operation::DetachGroup { group },
                    Some(ChangeEvent::GroupAdded { group, parent }),
                )
            }
            Operation::DetachGroup { group } => {
                let (parent, index, subtree) = tree.detach_group(group)?;
                (
                    Operation::InsertGroup {
                        parent,
                        index,
                        subtree,
                    },
                    Some(ChangeEvent::GroupRemoved { group, parent }),
                )
            }
            Operation::MoveGroup {
                group,
                parent,
                index,
            } => {
                let (from, old_index) = tree.move_group(group, parent, index)?;
                (
                    Operation::MoveGroup {
                        group,
                        parent: from,
                        index: old_index,
                    },
                    Some(ChangeEvent::GroupMoved {
                        group,
                        from,
                        to: parent,
                    }),
                )
            }
            Operation::InsertEntry {
                group,
                index,
                entry,
            } => {
                let id = entry.id();
                tree.insert_entry(group, index, entry)?;
                (
                    Operation::DetachEntry { entry: id },
                    Some(ChangeEvent::EntryAdded { entry: id, group }),
                )
            }
            Operation::DetachEntry { entry } => {
                let (group, index, detached) = tree.detach_entry(entry)?;
                (
                    Operation::InsertEntry {
                        group,
                        index,
                        entry: detached,
                    },
                    Some(ChangeEvent::EntryRemoved { entry, group }),
                )
            }
            Operation::MoveEntry {
                entry,
                group,
                index,
            } => {
                let (from, old_index) = tree.move_entry(entry, group, index)?;
                (
                    Operation::MoveEntry {
                        entry,
                        group: from,
                        index: old_index,
                    },
                    Some(ChangeEvent::EntryMoved {
                        entry,
                        from,
                        to: group,
                    }),
                )
            }
            Operation::InsertField {
                entry,
                index,
                field,
            } => {
                tree.insert_field(entry, index, field)?;
                (
                    Operation::RemoveField { entry, index },
                    Some(ChangeEvent::EntryChanged { entry }),
                )
            }
            Operation::RemoveField { entry, index } => {
                let field = tree.remove_field(entry, index)?;
                (
                    Operation::InsertField {
                        entry,
                        index,
                        field,
                    },
                    Some(ChangeEvent::EntryChanged { entry }),
                )
            }
            Operation::ReplaceField {
                entry,
                index,
                field,
            } => {
                let old = tree.replace_field(entry, index, field)?;
                (
                    Operation::ReplaceField {
                        entry,
                        index,
                        field: old,
                    },
                    Some(ChangeEvent::EntryChanged { entry }),
                )
            }
            Operation::InsertBinary { id, binary } => {
                tree.insert_binary(id, binary)?;
                (Operation::RemoveBinary { id }, None)
            }
            Operation::RemoveBinary { id } => {
                let binary = tree.remove_binary(id)?;
                (Operation::InsertBinary { id, binary }, None)
            }
            Operation::InsertAttachment {
                entry,
                index,
                reference,
            } => {
                tree.insert_attachment(entry, index, reference)?;
                (
                    Operation::RemoveAttachment { entry, index },
                    Some(ChangeEvent::EntryChanged { entry }),
                )
            }
            Operation::RemoveAttachment { entry, index } => {
                let reference = tree.remove_attachment(entry, index)?;
                (
                    Operation::InsertAttachment {
                        entry,
                        index,
                        reference,
                    },
                    Some(ChangeEvent::EntryChanged { entry }),
                )
            }
            Operation::RenameGroup { group, name } => {
                let old = tree.rename_group(group, name)?;
                (
                    Operation::RenameGroup { group, name: old },
                    Some(ChangeEvent::GroupChanged { group }),
                )
            }
            Operation::SetGroupIcon { group, icon } => {
                let old = tree.set_group_icon(group, icon)?;
                (
                    Operation::SetGroupIcon { group, icon: old },
                    Some(ChangeEvent::GroupChanged { group }),
                )
            }
            Operation::SetGroupTimes { group, times } => {
                let old = tree.set_group_times(group, times)?;
                (
                    Operation::SetGroupTimes { group, times: old },
                    Some(ChangeEvent::GroupChanged { group }),
                )
            }
            Operation::SetEntryIcon { entry, icon } => {
                let old = tree.set_entry_icon(entry, icon)?;
                (
                    Operation::SetEntryIcon { entry, icon: old },
                    Some(ChangeEvent::EntryChanged { entry }),
                )
            }
            Operation::SetEntryTimes { entry, times } => {
                let old = tree.set_entry_times(entry, times)?;
                (
                    Operation::SetEntryTimes { entry, times: old },
                    Some(ChangeEvent::EntryChanged { entry }),
                )
            }
            Operation::SetRole { role, group } => {
                let previous = tree.set_role(role, group)?;
                (
                    Operation::SetRole {
                        role,
                        group: previous,
                    },
                    Some(ChangeEvent::RolesChanged { role, group }),
                )
            }
        })
    }
}

/// An ordered list of operations applied as one action.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    operations: Vec<Operation>,
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation.
    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Builder form of [`push`](Self::push).
    #[must_use]
    pub fn with(mut self, operation: Operation) -> Self {
        self.push(operation);
        self
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the batch does nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Applies every operation in order.
    ///
    /// Returns the inverse batch (the inverses in reverse order) and the
    /// events, with repeats of the same event folded into one.
    ///
    /// Each step validates before mutating. If a later step is rejected,
    /// the steps already applied are rolled back through their inverses
    /// and the tree is left exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns the first model error.
    pub fn apply(self, tree: &mut Tree) -> ModelResult<(Batch, Vec<ChangeEvent>)> {
        let mut inverses = Vec::with_capacity(self.operations.len());
        let mut events: Vec<ChangeEvent> = Vec::new();
        for operation in self.operations {
            match operation.apply(tree) {
                Ok((inverse, event)) => {
                    inverses.push(inverse);
                    if let Some(event) = event {
                        if !events.contains(&event) {
                            events.push(event);
                        }
                    }
                }
                Err(err) => {
                    while let Some(inverse) = inverses.pop() {
                        if let Err(rollback) = inverse.apply(tree) {
                            warn!(error = %rollback, "rollback step failed");
                        }
                    }
                    return Err(err);
                }
            }
        }
        inverses.reverse();
        Ok((Batch { operations: inverses }, events))
    }
}

impl From<Operation> for Batch {
    fn from(operation: Operation) -> Self {
        Self::new().with(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use passdb_model::{DatabaseVersion, Group, ModelError, PASSWORD, TITLE};

    fn tree() -> (Tree, GroupId, EntryId) {
        let mut tree = Tree::new(DatabaseVersion::V4, "Root");
        let root = tree.root_id();
        let work = tree.add_group(root, Group::new(GroupId::new(), "Work")).unwrap();
        let email = tree
            .add_entry(
                work,
                Entry::new(EntryId::new())
                    .with_field(StringField::new(TITLE, "Email", false))
                    .with_field(StringField::new(PASSWORD, "x", true)),
            )
            .unwrap();
        (tree, work, email)
    }

    /// Applies, undoes, redoes and undoes again, leaving `tree` as it was.
    fn roundtrip(tree: &mut Tree, batch: Batch) {
        let before = tree.clone();
        let (undo, _) = batch.apply(tree).unwrap();
        let after = tree.clone();
        assert_ne!(after, before);

        let (redo, _) = undo.apply(tree).unwrap();
        assert_eq!(*tree, before);
        let (undo, _) = redo.apply(tree).unwrap();
        assert_eq!(*tree, after);
        undo.apply(tree).unwrap();
        assert_eq!(*tree, before);
    }

    #[test]
    fn every_operation_inverts_exactly() {
        let (mut tree, work, email) = tree();
        let root = tree.root_id();
        let fresh = Group::new(GroupId::new(), "Fresh");

        roundtrip(
            &mut tree,
            Operation::InsertGroup {
                parent: root,
                index: 0,
                subtree: GroupSubtree::single(fresh),
            }
            .into(),
        );
        roundtrip(&mut tree, Operation::DetachGroup { group: work }.into());
        roundtrip(
            &mut tree,
            Operation::InsertField {
                entry: email,
                index: 1,
                field: StringField::new("PIN", "1234", true),
            }
            .into(),
        );
        roundtrip(&mut tree, Operation::RemoveField { entry: email, index: 0 }.into());
        roundtrip(
            &mut tree,
            Operation::ReplaceField {
                entry: email,
                index: 0,
                field: StringField::new(TITLE, "Mail", false),
            }
            .into(),
        );
        roundtrip(
            &mut tree,
            Operation::RenameGroup {
                group: work,
                name: "Office".to_string(),
            }
            .into(),
        );
        roundtrip(&mut tree, Operation::SetEntryIcon { entry: email, icon: 7 }.into());
        roundtrip(
            &mut tree,
            Operation::SetRole {
                role: Role::Template,
                group: Some(work),
            }
            .into(),
        );
    }

    #[test]
    fn attachment_batch_inverts_store_too() {
        let (mut tree, _, email) = tree();
        let id = tree.attachments().next_id();
        let batch = Batch::new()
            .with(Operation::InsertBinary {
                id,
                binary: Binary::new(b"scan".to_vec(), true),
            })
            .with(Operation::InsertAttachment {
                entry: email,
                index: 0,
                reference: BinaryRef::new("scan.pdf", id),
            });
        roundtrip(&mut tree, batch);
        assert!(tree.attachments().is_empty());
    }

    #[test]
    fn failed_step_rolls_back_earlier_steps() {
        let (mut tree, work, email) = tree();
        let before = tree.clone();
        let batch = Batch::new()
            .with(Operation::RenameGroup {
                group: work,
                name: "Renamed".to_string(),
            })
            .with(Operation::InsertField {
                entry: email,
                index: 0,
                field: StringField::new(TITLE, "dup", false),
            });

        let err = batch.apply(&mut tree).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateField { .. }));
        assert_eq!(tree, before);
    }

    #[test]
    fn repeated_events_are_folded() {
        let (mut tree, _, email) = tree();
        let batch = Batch::new()
            .with(Operation::SetEntryIcon { entry: email, icon: 3 })
            .with(Operation::SetEntryTimes {
                entry: email,
                times: Times::now(),
            });
        let (_, events) = batch.apply(&mut tree).unwrap();
        assert_eq!(events, vec![ChangeEvent::EntryChanged { entry: email }]);
    }

    #[test]
    fn move_inverse_restores_position() {
        let (mut tree, work, _) = tree();
        let root = tree.root_id();
        let home = tree.add_group(root, Group::new(GroupId::new(), "Home")).unwrap();
        roundtrip(
            &mut tree,
            Operation::MoveGroup {
                group: home,
                parent: root,
                index: 0,
            }
            .into(),
        );
        roundtrip(
            &mut tree,
            Operation::MoveGroup {
                group: home,
                parent: work,
                index: 0,
            }
            .into(),
        );
    }
}
