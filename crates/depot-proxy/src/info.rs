use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When cached content was last confirmed against the origin, and under
/// which invalidation token.
///
/// Rewritten on every fetch attempt that reaches the origin, whether it
/// answered 200 or 304.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub last_verified: DateTime<Utc>,
    pub cache_token: Option<String>,
}

impl CacheInfo {
    pub fn new(last_verified: DateTime<Utc>, cache_token: Option<String>) -> Self {
        Self {
            last_verified,
            cache_token,
        }
    }
}

/// Validators the origin supplied with the content, replayed on revalidation.
///
/// Changes only when new content arrives. The etag is kept without quotes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

impl ContentInfo {
    pub fn new(last_modified: Option<DateTime<Utc>>, etag: Option<String>) -> Self {
        Self {
            last_modified,
            etag,
        }
    }

    /// Returns `true` if a conditional request can be made from these validators.
    pub fn has_validators(&self) -> bool {
        self.last_modified.is_some() || self.etag.is_some()
    }
}
