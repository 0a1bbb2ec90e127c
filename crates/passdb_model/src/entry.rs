//! Entries.

use crate::attachment::BinaryRef;
use crate::field::StringField;
use crate::id::{EntryId, GroupId};
use crate::times::Times;

/// A single credential record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub(crate) id: EntryId,
    pub(crate) group: GroupId,
    pub(crate) icon: u32,
    pub(crate) times: Times,
    pub(crate) fields: Vec<StringField>,
    pub(crate) attachments: Vec<BinaryRef>,
}

impl Entry {
    /// Creates a detached entry with no fields.
    ///
    /// The owning group is set when the entry is inserted into a tree.
    #[must_use]
    pub fn new(id: EntryId) -> Self {
        Self {
            id,
            group: GroupId::from_bytes([0; 16]),
            icon: 0,
            times: Times::now(),
            fields: Vec::new(),
            attachments: Vec::new(),
        }
    }

    /// Creates a detached entry carrying empty standard fields, the
    /// password field protected.
    #[must_use]
    pub fn with_standard_fields(id: EntryId) -> Self {
        let mut entry = Self::new(id);
        entry.fields = crate::STANDARD_KEYS
            .iter()
            .map(|key| StringField::new(*key, "", *key == crate::PASSWORD))
            .collect();
        entry
    }

    /// Sets the icon id.
    #[must_use]
    pub fn with_icon(mut self, icon: u32) -> Self {
        self.icon = icon;
        self
    }

    /// Sets the timestamps.
    #[must_use]
    pub fn with_times(mut self, times: Times) -> Self {
        self.times = times;
        self
    }

    /// Appends a field to a detached entry.
    ///
    /// Used by decoders; the tree validates key uniqueness on insert.
    #[must_use]
    pub fn with_field(mut self, field: StringField) -> Self {
        self.fields.push(field);
        self
    }

    /// Appends an attachment reference to a detached entry.
    #[must_use]
    pub fn with_attachment(mut self, reference: BinaryRef) -> Self {
        self.attachments.push(reference);
        self
    }

    /// Returns the id.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Returns the owning group.
    #[must_use]
    pub fn group(&self) -> GroupId {
        self.group
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

    /// String fields in order.
    #[must_use]
    pub fn fields(&self) -> &[StringField] {
        &self.fields
    }

    /// Attachment references in order.
    #[must_use]
    pub fn attachments(&self) -> &[BinaryRef] {
        &self.attachments
    }

    /// Looks up a field by key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&StringField> {
        self.fields.iter().find(|f| f.key() == key)
    }

    /// Position of the field with `key`.
    #[must_use]
    pub fn field_index(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.key() == key)
    }

    /// Value of the field with `key`, or the empty string.
    #[must_use]
    pub fn value(&self, key: &str) -> &str {
        self.field(key).map_or("", StringField::value)
    }

    /// Shorthand for the title field.
    #[must_use]
    pub fn title(&self) -> &str {
        self.value(crate::TITLE)
    }

    pub(crate) fn has_duplicate_keys(&self) -> Option<&str> {
        self.fields.iter().enumerate().find_map(|(i, f)| {
            self.fields[..i]
                .iter()
                .any(|other| other.key() == f.key())
                .then(|| f.key())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_fields() {
        let entry = Entry::with_standard_fields(EntryId::new());
        assert_eq!(entry.fields().len(), 5);
        assert!(entry.field(crate::PASSWORD).unwrap().is_protected());
        assert!(!entry.field(crate::TITLE).unwrap().is_protected());
        assert_eq!(entry.title(), "");
    }

    #[test]
    fn duplicate_detection() {
        let entry = Entry::new(EntryId::new())
            .with_field(StringField::new("a", "1", false))
            .with_field(StringField::new("b", "2", false));
        assert!(entry.has_duplicate_keys().is_none());

        let entry = entry.with_field(StringField::new("a", "3", false));
        assert_eq!(entry.has_duplicate_keys(), Some("a"));
    }
}
