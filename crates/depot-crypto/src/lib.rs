//! Hashing primitives for Depot.
//!
//! Provides one-shot SHA-1 content hashing and the [`MetricsReader`]
//! decorator, which computes size and digest of a stream while the bytes pass
//! through exactly once.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod error;
pub mod hasher;
pub mod metrics;

pub use error::MetricsError;
pub use hasher::ContentHasher;
pub use metrics::MetricsReader;
