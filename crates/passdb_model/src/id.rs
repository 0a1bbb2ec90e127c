//! Identifiers for groups, entries and binaries.

use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; 16]);

        impl $name {
            /// Creates an id from raw bytes.
            #[inline]
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Creates a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4().into_bytes())
            }

            /// Returns the raw bytes.
            #[inline]
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Converts to a UUID.
            #[must_use]
            pub fn to_uuid(&self) -> Uuid {
                Uuid::from_bytes(self.0)
            }

            /// Creates an id from a slice.
            ///
            /// Returns `None` if the slice is not exactly 16 bytes.
            #[must_use]
            pub fn from_slice(slice: &[u8]) -> Option<Self> {
                <[u8; 16]>::try_from(slice).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_uuid())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_uuid())
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid.into_bytes())
            }
        }
    };
}

uuid_id!(
    /// Stable identifier of a group.
    ///
    /// Group ids are 128-bit UUIDs, immutable once assigned.
    GroupId
);

uuid_id!(
    /// Stable identifier of an entry.
    EntryId
);

/// Index of a binary in the attachment store.
///
/// Binary ids are small integers assigned monotonically by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BinaryId(pub u32);

impl BinaryId {
    /// Creates a binary id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BinaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bin:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_unique() {
        assert_ne!(GroupId::new(), GroupId::new());
        assert_ne!(EntryId::new(), EntryId::new());
    }

    #[test]
    fn uuid_conversion() {
        let uuid = Uuid::new_v4();
        let id = EntryId::from(uuid);
        assert_eq!(id.to_uuid(), uuid);
    }

    #[test]
    fn from_slice() {
        assert!(GroupId::from_slice(&[0u8; 16]).is_some());
        assert!(GroupId::from_slice(&[0u8; 15]).is_none());
        assert!(GroupId::from_slice(&[0u8; 17]).is_none());
    }

    #[test]
    fn binary_id_display() {
        assert_eq!(BinaryId::new(3).to_string(), "bin:3");
    }
}
