//! Cache entry type.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached upstream payload.
///
/// Entries are replaced wholesale on every successful refresh; callers get
/// clones and never mutate the stored value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key chosen by the caller (without namespace prefix)
    pub key: String,
    /// Upstream JSON body, stored as returned
    pub data: Value,
    /// When the payload was written
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self::written_at(key, data, Utc::now())
    }

    /// Creates an entry with an explicit write time.
    pub fn written_at(key: impl Into<String>, data: Value, written_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            data,
            written_at,
        }
    }

    /// Age of the entry at `now`.
    ///
    /// A write time in the future (clock moved backwards) counts as age zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.written_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns true if the entry is older than `max_age` at `now`.
    pub fn is_stale_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age_at(now) > max_age
    }

    /// Returns true if the entry is older than `max_age` right now.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.is_stale_at(max_age, Utc::now())
    }
}
