use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProxyError, ProxyResult};

/// Configuration for one proxy facet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Origin base URL. A trailing slash is added when missing.
    pub remote_url: String,
    /// Minutes a verified item stays fresh. Negative disables age expiry.
    pub artifact_max_age_minutes: i64,
    /// Return stale content instead of failing when revalidation fails.
    pub serve_stale_on_error: bool,
    /// Whole-request timeout for origin fetches, in seconds.
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl ProxyConfig {
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            ..Self::default()
        }
    }

    /// Parse `remote_url` and make sure its path ends with `/`, so relative
    /// content paths resolve beneath it rather than replacing its last segment.
    pub fn normalized_remote_url(&self) -> ProxyResult<Url> {
        normalize_remote_url(&self.remote_url)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            remote_url: String::new(),
            artifact_max_age_minutes: 1440,
            serve_stale_on_error: false,
            request_timeout_secs: 60,
            user_agent: concat!("depot/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub fn normalize_remote_url(raw: &str) -> ProxyResult<Url> {
    let mut url = Url::parse(raw).map_err(|e| ProxyError::Config(format!("invalid remote url {raw:?}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ProxyError::Config(format!("remote url {raw:?} cannot be a base")));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ProxyError::Config(format!("remote url {raw:?} must not carry a query or fragment")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
