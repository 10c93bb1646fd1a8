use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Store-wide cache token. Rotating it invalidates every cached item at once;
/// items notice lazily when their recorded token no longer matches.
///
/// `0` means no token has been issued yet, in which case token checks are
/// skipped.
#[derive(Debug, Default)]
pub struct InvalidationToken {
    current: AtomicU64,
}

impl InvalidationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from a token issued by an earlier process. Returns `None` if
    /// `value` is not a token this type could have issued.
    pub fn resume(value: &str) -> Option<Self> {
        match value.trim().parse::<u64>() {
            Ok(0) | Err(_) => None,
            Ok(current) => Some(Self {
                current: AtomicU64::new(current),
            }),
        }
    }

    /// The current token, or `None` if caches have never been invalidated.
    pub fn current(&self) -> Option<String> {
        match self.current.load(Ordering::Acquire) {
            0 => None,
            value => Some(value.to_string()),
        }
    }

    /// Issue a new token, distinct from every token issued before.
    pub fn rotate(&self) -> String {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
        let previous = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                Some(now.max(prev.saturating_add(1)))
            })
            .unwrap_or_else(|prev| prev);
        now.max(previous.saturating_add(1)).to_string()
    }
}
