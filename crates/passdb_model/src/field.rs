//! String fields of an entry.

use zeroize::Zeroize;

/// Keys every entry carries in both layouts.
pub const STANDARD_KEYS: [&str; 5] = [
    crate::TITLE,
    crate::USER_NAME,
    crate::PASSWORD,
    crate::URL,
    crate::NOTES,
];

/// A key/value pair stored on an entry.
///
/// Values are scrubbed from memory when the field is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct StringField {
    key: String,
    value: String,
    protected: bool,
}

impl StringField {
    /// Creates a field.
    pub fn new(key: impl Into<String>, value: impl Into<String>, protected: bool) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            protected,
        }
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the value is protected in memory and on disk.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Returns true for one of the [`STANDARD_KEYS`].
    #[must_use]
    pub fn is_standard(&self) -> bool {
        STANDARD_KEYS.contains(&self.key.as_str())
    }

    /// Returns a copy with a different value.
    #[must_use]
    pub fn with_value(&self, value: impl Into<String>) -> Self {
        Self::new(self.key.clone(), value, self.protected)
    }
}

impl std::fmt::Debug for StringField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("StringField");
        s.field("key", &self.key);
        if self.protected {
            s.field("value", &"[REDACTED]");
        } else {
            s.field("value", &self.value);
        }
        s.field("protected", &self.protected).finish()
    }
}

impl Drop for StringField {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_protected() {
        let field = StringField::new("Password", "hunter2", true);
        let out = format!("{field:?}");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("REDACTED"));
    }

    #[test]
    fn debug_shows_plain() {
        let field = StringField::new("UserName", "alice", false);
        assert!(format!("{field:?}").contains("alice"));
    }

    #[test]
    fn standard_keys() {
        assert!(StringField::new("URL", "", false).is_standard());
        assert!(!StringField::new("PIN", "", true).is_standard());
    }
}
