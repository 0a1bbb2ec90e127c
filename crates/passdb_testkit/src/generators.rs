//! Property-based test generators using proptest.
//!
//! Edit scripts address groups and entries by position in the current
//! tree (modulo its size), so every generated step names something that
//! exists when it runs. Steps may still be rejected by the document, e.g.
//! moving a group under itself; a rejected step must leave no trace.

use passdb_core::Document;
use passdb_model::{EntryId, GroupId, PASSWORD, TITLE};
use proptest::prelude::*;

/// Strategy for short printable text, including XML metacharacters.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 &<>'\"._@!-]{0,16}").expect("Invalid regex")
}

/// Strategy for non-empty group names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 _-]{0,15}").expect("Invalid regex")
}

/// Strategy for attachment content.
pub fn attachment_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// One user-level edit.
#[derive(Debug, Clone)]
pub enum EditStep {
    /// Create a group under the n-th group.
    AddGroup {
        /// Parent position.
        parent: usize,
    },
    /// Create an entry in the n-th group.
    AddEntry {
        /// Group position.
        group: usize,
    },
    /// Rename the n-th group.
    RenameGroup {
        /// Group position.
        group: usize,
        /// New name.
        name: String,
    },
    /// Change the title and password of the n-th entry.
    EditEntry {
        /// Entry position.
        entry: usize,
        /// New title.
        title: String,
        /// New password.
        password: String,
    },
    /// Add a custom field to the n-th entry.
    AddField {
        /// Entry position.
        entry: usize,
    },
    /// Move the n-th entry into the m-th group.
    MoveEntry {
        /// Entry position.
        entry: usize,
        /// Target group position.
        group: usize,
        /// Position among the target's entries.
        index: usize,
    },
    /// Move the n-th group under the m-th group.
    MoveGroup {
        /// Group position.
        group: usize,
        /// Target parent position.
        parent: usize,
        /// Position among the target's children.
        index: usize,
    },
    /// Delete the n-th entry.
    DeleteEntry {
        /// Entry position.
        entry: usize,
    },
    /// Delete the n-th group.
    DeleteGroup {
        /// Group position.
        group: usize,
    },
    /// Attach content to the n-th entry.
    Attach {
        /// Entry position.
        entry: usize,
        /// Content.
        data: Vec<u8>,
    },
    /// Drop every attachment of the n-th entry.
    Detach {
        /// Entry position.
        entry: usize,
    },
}

/// Strategy for a single edit.
pub fn edit_step_strategy() -> impl Strategy<Value = EditStep> {
    let pos = || 0usize..64;
    prop_oneof![
        3 => pos().prop_map(|parent| EditStep::AddGroup { parent }),
        3 => pos().prop_map(|group| EditStep::AddEntry { group }),
        1 => (pos(), name_strategy()).prop_map(|(group, name)| EditStep::RenameGroup { group, name }),
        2 => (pos(), text_strategy(), text_strategy())
            .prop_map(|(entry, title, password)| EditStep::EditEntry { entry, title, password }),
        1 => pos().prop_map(|entry| EditStep::AddField { entry }),
        2 => (pos(), pos(), pos()).prop_map(|(entry, group, index)| EditStep::MoveEntry { entry, group, index }),
        2 => (pos(), pos(), pos()).prop_map(|(group, parent, index)| EditStep::MoveGroup { group, parent, index }),
        2 => pos().prop_map(|entry| EditStep::DeleteEntry { entry }),
        1 => pos().prop_map(|group| EditStep::DeleteGroup { group }),
        1 => (pos(), attachment_strategy()).prop_map(|(entry, data)| EditStep::Attach { entry, data }),
        1 => pos().prop_map(|entry| EditStep::Detach { entry }),
    ]
}

/// Strategy for a sequence of edits.
pub fn edit_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<EditStep>> {
    prop::collection::vec(edit_step_strategy(), 1..max_len)
}

fn pick_group(doc: &Document, n: usize) -> Option<GroupId> {
    doc.with_tree(|tree| {
        let groups = tree.walk_groups();
        groups.get(n % groups.len()).map(|g| g.id())
    })
    .ok()
    .flatten()
}

fn pick_entry(doc: &Document, n: usize) -> Option<EntryId> {
    doc.with_tree(|tree| {
        let entries = tree.walk_entries();
        if entries.is_empty() {
            None
        } else {
            Some(entries[n % entries.len()].id())
        }
    })
    .ok()
    .flatten()
}

/// Applies one edit. Returns whether the document accepted it.
pub fn apply_step(doc: &Document, step: &EditStep) -> bool {
    let result = match step {
        EditStep::AddGroup { parent } => pick_group(doc, *parent)
            .map(|parent| doc.create_group(parent).map(drop)),
        EditStep::AddEntry { group } => {
            pick_group(doc, *group).map(|group| doc.create_entry(group).map(drop))
        }
        EditStep::RenameGroup { group, name } => {
            pick_group(doc, *group).map(|group| doc.set_group_name(group, name))
        }
        EditStep::EditEntry {
            entry,
            title,
            password,
        } => pick_entry(doc, *entry).map(|entry| {
            doc.update_string_field(entry, TITLE, title, false)
                .and_then(|()| doc.update_string_field(entry, PASSWORD, password, true))
        }),
        EditStep::AddField { entry } => {
            pick_entry(doc, *entry).map(|entry| doc.create_string_field(entry).map(drop))
        }
        EditStep::MoveEntry {
            entry,
            group,
            index,
        } => pick_entry(doc, *entry)
            .zip(pick_group(doc, *group))
            .map(|(entry, group)| doc.move_entry(entry, group, *index)),
        EditStep::MoveGroup {
            group,
            parent,
            index,
        } => pick_group(doc, *group)
            .zip(pick_group(doc, *parent))
            .map(|(group, parent)| doc.move_group(group, parent, *index)),
        EditStep::DeleteEntry { entry } => {
            pick_entry(doc, *entry).map(|entry| doc.delete_entry(entry))
        }
        EditStep::DeleteGroup { group } => {
            pick_group(doc, *group).map(|group| doc.delete_group(group))
        }
        EditStep::Attach { entry, data } => pick_entry(doc, *entry)
            .map(|entry| doc.add_attachment(entry, "file.bin", data.clone()).map(drop)),
        EditStep::Detach { entry } => {
            pick_entry(doc, *entry).map(|entry| doc.remove_all_attachments(entry))
        }
    };
    matches!(result, Some(Ok(())))
}

/// Applies a whole script, returning how many steps were accepted.
pub fn apply_script(doc: &Document, steps: &[EditStep]) -> usize {
    steps.iter().filter(|step| apply_step(doc, step)).count()
}
