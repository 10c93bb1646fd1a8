use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Maximum length of a blob identifier.
const MAX_LEN: usize = 128;

/// Opaque, globally unique identifier for one stored payload.
///
/// Freshly allocated ids are random UUIDs. Ids supplied from outside (imports,
/// recovery) are validated so that they are always safe to use as a single
/// file name component: ASCII alphanumerics plus `-`, `_` and `.`, and never
/// a relative path segment like `.` or `..`.
///
/// A `BlobId` is immutable once assigned. It doubles as the lock key and the
/// metadata key inside the blob store.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobId(String);

impl BlobId {
    /// Allocate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an externally supplied identifier, validating its shape.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("empty")
        } else if id.len() > MAX_LEN {
            Some("too long")
        } else if id == "." || id == ".." {
            Some("relative path segment")
        } else if !id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            Some("contains characters outside [A-Za-z0-9._-]")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(TypeError::InvalidBlobId { id, reason }),
            None => Ok(Self(id)),
        }
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for BlobId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlobId> for String {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

impl AsRef<str> for BlobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn random_ids_are_unique() {
        let a = BlobId::random();
        let b = BlobId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn random_id_is_valid() {
        let id = BlobId::random();
        assert_eq!(BlobId::new(id.as_str()).unwrap(), id);
    }

    #[test]
    fn rejects_path_separators() {
        assert!(BlobId::new("a/b").is_err());
        assert!(BlobId::new("..").is_err());
        assert!(BlobId::new(".").is_err());
        assert!(BlobId::new("").is_err());
        assert!(BlobId::new("x".repeat(MAX_LEN + 1)).is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(BlobId::new("duplicate-id_1.v2").is_ok());
    }

    #[test]
    fn serde_rejects_invalid() {
        let err = serde_json::from_str::<BlobId>("\"../etc/passwd\"");
        assert!(err.is_err());
        let ok: BlobId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
    }

    proptest! {
        #[test]
        fn valid_ids_roundtrip(s in "[A-Za-z0-9_-][A-Za-z0-9._-]{0,40}") {
            let id = BlobId::new(s.clone()).unwrap();
            prop_assert_eq!(id.to_string(), s);
        }
    }
}
