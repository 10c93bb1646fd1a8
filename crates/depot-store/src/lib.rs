//! File-backed blob storage for Depot.
//!
//! Blobs are opaque byte payloads written once under a random [`BlobId`] and
//! read back with their size and SHA-1 verified. Content lives in a sharded
//! directory tree (`vol-NN/chap-MM/<id>.bytes`); records live in an
//! append-only metadata log.
//!
//! # Lifecycle of a blob
//!
//! ```text
//! absent --create--> live --delete--> tombstoned --compact--> absent
//! ```
//!
//! # Design Rules
//!
//! 1. Creates never overwrite: an existing id or path is an error.
//! 2. A failed create leaves neither a file nor a record behind.
//! 3. Deletion only tombstones; bytes are reclaimed by compaction.
//! 4. Every operation holds the blob's lock: readers share it, writers own it.
//!    Operations on different blobs never contend.
//! 5. An open [`Blob`] handle keeps its blob from being compacted away.
//! 6. All I/O errors are propagated, never silently ignored.
//!
//! [`BlobId`]: depot_types::BlobId

pub mod blob;
pub mod config;
pub mod error;
pub mod file_ops;
pub mod location;
pub mod locks;
pub mod metadata;
pub mod store;

pub use blob::{Blob, VerifyingReader};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use file_ops::{FileOperations, SimpleFileOperations};
pub use location::{LocationStrategy, VolumeChapterLocationStrategy};
pub use metadata::{BlobMetadataStore, InMemoryMetadataStore, LogConfig, LogMetadataStore, SyncMode};
pub use store::{BlobStore, BlobStoreMetrics, CompactionReport, FileBlobStore};
