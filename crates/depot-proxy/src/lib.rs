//! Proxy-cache protocol for Depot.
//!
//! A [`ProxyCache`] sits in front of a remote origin. Cached content is served
//! while fresh; once stale it is revalidated with a conditional GET built from
//! the validators the origin sent last time.
//!
//! # Freshness
//!
//! Evaluated in order, first match wins:
//!
//! 1. Nothing cached: stale.
//! 2. No [`CacheInfo`]: stale.
//! 3. A cache token has been issued and the item carries a different one: stale.
//! 4. Verified longer ago than the max age (unless the max age is negative): stale.
//! 5. Otherwise fresh.
//!
//! # Revalidation
//!
//! - `200`: the body is spooled to a temp file, stored as a new blob, and the
//!   new [`ContentInfo`] and [`CacheInfo`] are recorded with it.
//! - `304`: only [`CacheInfo`] is rewritten.
//! - Anything else: the failure propagates and cached content is left as is.

pub mod attributes;
pub mod backing;
pub mod config;
pub mod error;
pub mod freshness;
pub mod http;
pub mod info;
pub mod lifecycle;
pub mod proxy;
pub mod raw;
pub mod token;

pub use attributes::{AssetAttributes, AttributeStorage};
pub use backing::{Content, Context, FreshContent, ProxyBacking};
pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use freshness::{FreshnessPolicy, Staleness};
pub use info::{CacheInfo, ContentInfo};
pub use lifecycle::Lifecycle;
pub use proxy::ProxyCache;
pub use raw::{RawProxyStore, SweepReport};
pub use token::InvalidationToken;
