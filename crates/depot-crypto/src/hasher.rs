use depot_types::{Sha1Hash, StreamMetrics};
use sha1::{Digest, Sha1};

/// One-shot SHA-1 content hasher.
///
/// For streams of unknown size use [`crate::MetricsReader`] instead; this type
/// is for payloads that are already in memory (tests, small documents).
pub struct ContentHasher;

impl ContentHasher {
    /// SHA-1 of the given bytes.
    pub fn sha1(data: &[u8]) -> Sha1Hash {
        Sha1Hash::from_bytes(Sha1::digest(data).into())
    }

    /// Size and SHA-1 of the given bytes.
    pub fn metrics(data: &[u8]) -> StreamMetrics {
        StreamMetrics::new(data.len() as u64, Self::sha1(data))
    }
}
