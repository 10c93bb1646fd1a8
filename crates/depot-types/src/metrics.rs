use serde::{Deserialize, Serialize};

use crate::hash::Sha1Hash;

/// Size and content digest of a byte stream, computed once while the bytes
/// were written. Never recomputed afterwards; readers compare against it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Number of bytes in the stream.
    pub size: u64,
    /// SHA-1 of the stream.
    pub sha1: Sha1Hash,
}

impl StreamMetrics {
    pub fn new(size: u64, sha1: Sha1Hash) -> Self {
        Self { size, sha1 }
    }
}
