//! Foundation types for Depot.
//!
//! This crate provides the identity and integrity types shared by the blob
//! store and the proxy cache. Every other Depot crate depends on `depot-types`.
//!
//! # Key Types
//!
//! - [`BlobId`] -- Opaque, globally unique identifier for one stored payload
//! - [`Sha1Hash`] -- 160-bit content digest
//! - [`StreamMetrics`] -- Size and digest computed in a single pass over a stream
//! - [`BlobRecord`] -- Durable metadata for a stored blob, including its tombstone flag

pub mod blob_id;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod record;

pub use blob_id::BlobId;
pub use error::TypeError;
pub use hash::Sha1Hash;
pub use metrics::StreamMetrics;
pub use record::{BlobRecord, Headers, BLOB_NAME_HEADER, CONTENT_TYPE_HEADER, CREATED_BY_HEADER};
