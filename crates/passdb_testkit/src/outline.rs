//! Id-independent tree outlines.
//!
//! KDB files number their groups instead of storing UUIDs, so a KDB round
//! trip cannot preserve group ids. An [`Outline`] captures what must
//! survive anyway: names, order, nesting and entry content.

use passdb_model::{Group, Tree};

/// Names, nesting and entry content of a tree, without ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outline {
    /// Group name.
    pub name: String,
    /// Whether the group is the trash.
    pub trash: bool,
    /// Entries as `(key, value)` lists in field order.
    pub entries: Vec<Vec<(String, String)>>,
    /// Attachment file names per entry.
    pub attachments: Vec<Vec<String>>,
    /// Child groups in order.
    pub children: Vec<Outline>,
}

impl Outline {
    /// Outlines the whole tree.
    pub fn of(tree: &Tree) -> Self {
        Self::group(tree, tree.root())
    }

    fn group(tree: &Tree, group: &Group) -> Self {
        let entries: Vec<_> = group
            .entries()
            .iter()
            .filter_map(|id| tree.find_entry(*id))
            .collect();
        Self {
            name: group.name().to_string(),
            trash: tree.trash() == Some(group.id()),
            entries: entries
                .iter()
                .map(|e| {
                    e.fields()
                        .iter()
                        .map(|f| (f.key().to_string(), f.value().to_string()))
                        .collect()
                })
                .collect(),
            attachments: entries
                .iter()
                .map(|e| e.attachments().iter().map(|a| a.name.clone()).collect())
                .collect(),
            children: group
                .groups()
                .iter()
                .filter_map(|id| tree.find_group(*id))
                .map(|g| Self::group(tree, g))
                .collect(),
        }
    }

    /// Returns a copy with every trash flag cleared.
    ///
    /// KDB marks its trash by name and position only, so renaming or
    /// moving the trash group does not survive a KDB round trip.
    #[must_use]
    pub fn without_roles(mut self) -> Self {
        self.trash = false;
        self.children = self.children.into_iter().map(Outline::without_roles).collect();
        self
    }

    /// Number of groups in the outline, this one included.
    pub fn group_count(&self) -> usize {
        1 + self.children.iter().map(Outline::group_count).sum::<usize>()
    }
}
