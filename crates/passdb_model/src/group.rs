//! Groups.

use crate::id::{EntryId, GroupId};
use crate::times::Times;

/// Special purposes a single group can be designated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Receives soft-deleted groups and entries.
    Trash,
    /// Holds entry templates.
    Template,
}

/// A folder-like container of entries and sub-groups.
///
/// Children are stored by id; the [`Tree`](crate::Tree) arena owns the
/// actual items. The order of both child sequences is significant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub(crate) id: GroupId,
    pub(crate) parent: Option<GroupId>,
    pub(crate) name: String,
    pub(crate) notes: String,
    pub(crate) icon: u32,
    pub(crate) times: Times,
    pub(crate) groups: Vec<GroupId>,
    pub(crate) entries: Vec<EntryId>,
    pub(crate) trash: bool,
    pub(crate) template: bool,
}

impl Group {
    /// Creates a detached group with no children.
    pub fn new(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            parent: None,
            name: name.into(),
            notes: String::new(),
            icon: 48,
            times: Times::now(),
            groups: Vec::new(),
            entries: Vec::new(),
            trash: false,
            template: false,
        }
    }

    /// Sets the icon id.
    #[must_use]
    pub fn with_icon(mut self, icon: u32) -> Self {
        self.icon = icon;
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Sets the timestamps.
    #[must_use]
    pub fn with_times(mut self, times: Times) -> Self {
        self.times = times;
        self
    }

    /// Returns the id.
    #[must_use]
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Returns the parent id, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    /// Returns the name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the notes.
    #[must_use]
    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Returns the icon id.
    #[must_use]
    pub fn icon(&self) -> u32 {
        self.icon
    }

    /// Returns the timestamps.
    #[must_use]
    pub fn times(&self) -> &Times {
        &self.times
    }

    /// Child groups in order.
    #[must_use]
    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    /// Child entries in order.
    #[must_use]
    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }

    /// Returns true if this group holds `role`.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        match role {
            Role::Trash => self.trash,
            Role::Template => self.template,
        }
    }

    pub(crate) fn set_role_flag(&mut self, role: Role, value: bool) {
        match role {
            Role::Trash => self.trash = value,
            Role::Template => self.template = value,
        }
    }
}
