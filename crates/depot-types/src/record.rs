use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blob_id::BlobId;
use crate::hash::Sha1Hash;
use crate::metrics::StreamMetrics;

/// Header naming the logical path the blob was stored under. Required on create.
pub const BLOB_NAME_HEADER: &str = "BlobStore.blob-name";

/// Header naming the principal or subsystem that created the blob. Required on create.
pub const CREATED_BY_HEADER: &str = "BlobStore.created-by";

/// Optional header carrying the payload's media type.
pub const CONTENT_TYPE_HEADER: &str = "BlobStore.content-type";

/// Free-form blob headers, kept sorted for deterministic serialization.
pub type Headers = BTreeMap<String, String>;

/// Durable metadata for one stored blob.
///
/// Created on a successful create, mutated only to flip `soft_deleted` on
/// delete, and erased by compaction together with the backing bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub blob_id: BlobId,
    pub content_size: u64,
    pub sha1: Sha1Hash,
    pub headers: Headers,
    pub soft_deleted: bool,
    pub creation_time: DateTime<Utc>,
}

impl BlobRecord {
    /// Build a live record from freshly computed stream metrics.
    pub fn new(blob_id: BlobId, metrics: StreamMetrics, headers: Headers) -> Self {
        Self {
            blob_id,
            content_size: metrics.size,
            sha1: metrics.sha1,
            headers,
            soft_deleted: false,
            creation_time: Utc::now(),
        }
    }

    /// The metrics recorded when the blob was written.
    pub fn metrics(&self) -> StreamMetrics {
        StreamMetrics::new(self.content_size, self.sha1)
    }

    /// Returns `true` if the record has not been tombstoned.
    pub fn is_live(&self) -> bool {
        !self.soft_deleted
    }
}
