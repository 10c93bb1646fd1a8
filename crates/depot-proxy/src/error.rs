use std::io;

use depot_store::StoreError;

use crate::lifecycle::Lifecycle;

/// Errors from the proxy-cache layer.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The origin answered with something other than 200 or 304.
    #[error("remote fetch of {url} failed with status {status}")]
    RemoteFetch { url: String, status: u16 },

    /// The request never produced a complete response.
    #[error("transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The operation is not legal in the facet's current lifecycle state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: Lifecycle,
    },

    /// Invalid configuration (remote URL, HTTP client settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// A request path that cannot name cached content.
    #[error("invalid content path: {0}")]
    InvalidPath(String),

    #[error("blob store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attribute document could not be encoded or persisted.
    #[error("attribute storage error: {0}")]
    Attributes(String),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ProxyError {
    /// Returns `true` if the origin reported the content as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RemoteFetch { status: 404, .. })
    }

    /// Returns `true` for failures talking to the origin, as opposed to local storage.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::RemoteFetch { .. } | Self::Transport { .. })
    }
}

/// Result alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
