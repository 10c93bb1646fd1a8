use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::info::CacheInfo;

/// Why an item is or is not served from cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    NotCached,
    NoCacheInfo,
    TokenMismatch,
    Expired,
}

impl Staleness {
    pub fn is_stale(self) -> bool {
        self != Self::Fresh
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Fresh => "fresh",
            Self::NotCached => "not cached",
            Self::NoCacheInfo => "cache info unknown",
            Self::TokenMismatch => "expired by cache token",
            Self::Expired => "expired by age",
        };
        f.write_str(reason)
    }
}

/// Decides whether cached content may be served without revalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreshnessPolicy {
    max_age: Option<Duration>,
}

impl FreshnessPolicy {
    /// A negative `minutes` disables age expiry. Token expiry still applies.
    pub fn from_minutes(minutes: i64) -> Self {
        Self {
            max_age: (minutes >= 0).then(|| Duration::minutes(minutes)),
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Rules, first match wins: nothing cached, no cache info, token changed
    /// since verification, verified longer than `max_age` ago.
    ///
    /// `cached` is `None` when nothing is cached and `Some(cache_info)` otherwise.
    pub fn evaluate(
        &self,
        cached: Option<Option<&CacheInfo>>,
        current_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Staleness {
        let Some(cache_info) = cached else {
            return Staleness::NotCached;
        };
        let Some(cache_info) = cache_info else {
            return Staleness::NoCacheInfo;
        };
        if let Some(token) = current_token {
            if cache_info.cache_token.as_deref() != Some(token) {
                return Staleness::TokenMismatch;
            }
        }
        match self.max_age {
            Some(max_age) if now - cache_info.last_verified > max_age => Staleness::Expired,
            _ => Staleness::Fresh,
        }
    }
}
