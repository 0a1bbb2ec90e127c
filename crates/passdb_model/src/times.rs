//! Item timestamps.

use chrono::{DateTime, TimeZone, Utc};

/// Creation, modification, access and expiry times of a group or entry.
///
/// All times are kept at whole-second precision, the precision both file
/// layouts persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Times {
    /// When the item was created.
    pub creation: DateTime<Utc>,
    /// When the item was last modified.
    pub last_modification: DateTime<Utc>,
    /// When the item was last accessed.
    pub last_access: DateTime<Utc>,
    /// When the item expires, if ever.
    pub expiry: Option<DateTime<Utc>>,
}

impl Times {
    /// All timestamps set to the current second, no expiry.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// All timestamps set to `at` (truncated to seconds), no expiry.
    #[must_use]
    pub fn at(at: DateTime<Utc>) -> Self {
        let at = truncate(at);
        Self {
            creation: at,
            last_modification: at,
            last_access: at,
            expiry: None,
        }
    }

    /// Returns a copy with modification and access times set to `at`.
    #[must_use]
    pub fn touched(self, at: DateTime<Utc>) -> Self {
        let at = truncate(at);
        Self {
            last_modification: at,
            last_access: at,
            ..self
        }
    }
}

impl Default for Times {
    fn default() -> Self {
        Self::now()
    }
}

/// Drops the sub-second part of a timestamp.
#[must_use]
pub(crate) fn truncate(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(at.timestamp(), 0).single().unwrap_or(at)
}
