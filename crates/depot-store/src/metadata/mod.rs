//! Durable blob metadata.
//!
//! The blob store keeps one [`BlobRecord`] per blob. Two backends are
//! provided: an append-only log on disk and an in-memory map for tests.

mod log;
mod memory;

pub use log::{LogConfig, LogMetadataStore, SyncMode};
pub use memory::InMemoryMetadataStore;

use depot_types::{BlobId, BlobRecord};

use crate::error::StoreResult;

/// Storage for blob records keyed by [`BlobId`].
///
/// Implementations must be safe to share across threads. Callers serialize
/// mutations of a single id through the store's per-blob locks.
pub trait BlobMetadataStore: Send + Sync {
    /// Insert or replace the record for `record.blob_id`.
    fn put(&self, record: BlobRecord) -> StoreResult<()>;

    /// Fetch a record, including soft-deleted ones.
    fn get(&self, id: &BlobId) -> StoreResult<Option<BlobRecord>>;

    /// Flip a live record to soft-deleted. Returns `false` if the record is
    /// absent or already soft-deleted.
    fn mark_deleted(&self, id: &BlobId) -> StoreResult<bool>;

    /// Remove a record entirely. Returns `true` if it existed.
    fn erase(&self, id: &BlobId) -> StoreResult<bool>;

    /// All records, optionally including soft-deleted ones.
    fn list(&self, include_soft_deleted: bool) -> StoreResult<Vec<BlobRecord>>;

    /// Reclaim space held by erased or superseded entries.
    ///
    /// Returns `true` if any work was done.
    fn maintain(&self) -> StoreResult<bool> {
        Ok(false)
    }
}
