use std::fs::File;

use async_trait::async_trait;
use depot_store::Blob;

use crate::error::{ProxyError, ProxyResult};
use crate::info::{CacheInfo, ContentInfo};

/// The logical path of a request, relative to the repository root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Context {
    path: String,
}

impl Context {
    /// Leading slashes are dropped. The result must be usable both as a
    /// relative file path and as a relative URL reference, so empty segments,
    /// `.`/`..` segments (percent-encoded or not), backslashes, control
    /// characters, `?`, `#`, and a colon in the first segment are rejected.
    pub fn new(path: impl AsRef<str>) -> ProxyResult<Self> {
        let path = path.as_ref().trim_start_matches('/');
        let invalid = || ProxyError::InvalidPath(path.to_string());
        if path.is_empty() || path.ends_with('/') {
            return Err(invalid());
        }
        if path.contains(['?', '#', '\\']) || path.chars().any(char::is_control) {
            return Err(invalid());
        }
        // `a:b` would parse as a URL with scheme `a`.
        if path.split('/').next().is_some_and(|first| first.contains(':')) {
            return Err(invalid());
        }
        let dot_segment = |segment: &str| {
            let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
            decoded == "." || decoded == ".."
        };
        if path.split('/').any(|segment| segment.is_empty() || dot_segment(segment)) {
            return Err(invalid());
        }
        Ok(Self {
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Cached content as served to clients.
///
/// Holds the underlying [`Blob`] open, and with it a shared lock on the blob.
/// Drop it before any operation that may replace or delete the same content.
#[derive(Debug)]
pub struct Content {
    blob: Blob,
    pub content_type: Option<String>,
    pub content_info: ContentInfo,
    pub cache_info: Option<CacheInfo>,
}

impl Content {
    pub fn new(
        blob: Blob,
        content_type: Option<String>,
        content_info: ContentInfo,
        cache_info: Option<CacheInfo>,
    ) -> Self {
        Self {
            blob,
            content_type,
            content_info,
            cache_info,
        }
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    pub fn size(&self) -> u64 {
        self.blob.size()
    }

    pub fn into_blob(self) -> Blob {
        self.blob
    }

    /// Read the whole payload, verifying it against its recorded size and SHA-1.
    /// Blocking.
    pub fn read_verified(self) -> ProxyResult<Vec<u8>> {
        Ok(self.blob.read_verified()?)
    }
}

/// A complete 200 response, spooled to a temporary file and ready to store.
#[derive(Debug)]
pub struct FreshContent {
    /// Anonymous temp file positioned at the start of the body.
    pub body: File,
    pub content_type: Option<String>,
    pub content_info: ContentInfo,
    pub cache_info: CacheInfo,
}

/// Local storage behind a proxy: where cached content is found, stored, and
/// marked as verified.
#[async_trait]
pub trait ProxyBacking: Send + Sync {
    /// The cached content for `ctx`, if any.
    async fn cached(&self, ctx: &Context) -> ProxyResult<Option<Content>>;

    /// Replace whatever is cached for `ctx` with `fresh`, returning the stored content.
    async fn store(&self, ctx: &Context, fresh: FreshContent) -> ProxyResult<Content>;

    /// Record a successful revalidation. Bytes and [`ContentInfo`] are untouched.
    async fn indicate_verified(&self, ctx: &Context, cache_info: CacheInfo) -> ProxyResult<()>;
}
