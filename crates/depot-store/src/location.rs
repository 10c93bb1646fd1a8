use std::path::PathBuf;

use depot_types::BlobId;

/// Maps a blob id to its path relative to the store's content directory.
///
/// Implementations must be pure: the same id maps to the same path forever,
/// with no I/O and no mutable state.
pub trait LocationStrategy: Send + Sync {
    fn location(&self, id: &BlobId) -> PathBuf;
}

/// Two-level sharding into `vol-NN/chap-MM/<id>.bytes`.
///
/// The shard is derived from a CRC32 of the id, so a store holding millions of
/// blobs spreads them over `VOLUMES * CHAPTERS` leaf directories.
#[derive(Clone, Copy, Debug, Default)]
pub struct VolumeChapterLocationStrategy;

impl VolumeChapterLocationStrategy {
    pub const VOLUMES: u32 = 43;
    pub const CHAPTERS: u32 = 47;
}

impl LocationStrategy for VolumeChapterLocationStrategy {
    fn location(&self, id: &BlobId) -> PathBuf {
        let hash = crc32fast::hash(id.as_str().as_bytes());
        let volume = hash % Self::VOLUMES + 1;
        let chapter = (hash / Self::VOLUMES) % Self::CHAPTERS + 1;
        PathBuf::from(format!("vol-{volume:02}"))
            .join(format!("chap-{chapter:02}"))
            .join(format!("{id}.bytes"))
    }
}
