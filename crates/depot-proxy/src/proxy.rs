use std::io::Seek;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::backing::{Content, Context, FreshContent, ProxyBacking};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::freshness::FreshnessPolicy;
use crate::http;
use crate::info::{CacheInfo, ContentInfo};
use crate::lifecycle::Lifecycle;
use crate::token::InvalidationToken;

struct FacetState {
    lifecycle: Lifecycle,
    config: ProxyConfig,
    remote_url: Url,
    policy: FreshnessPolicy,
    client: Client,
    remote_url_changed: bool,
}

/// Per-request copy of the settings a fetch needs, taken so no lock is held
/// across the network round trip.
struct Snapshot {
    remote_url: Url,
    policy: FreshnessPolicy,
    client: Client,
    serve_stale_on_error: bool,
}

enum FetchOutcome {
    Fresh(FreshContent),
    NotModified,
}

/// A caching proxy in front of one remote origin.
///
/// `get` serves cached content while it is fresh and revalidates it with a
/// conditional GET once it goes stale. `invalidate_proxy_caches` expires every
/// item at once by rotating the cache token; no stored item is touched.
pub struct ProxyCache {
    name: String,
    backing: Arc<dyn ProxyBacking>,
    token: Arc<InvalidationToken>,
    state: RwLock<FacetState>,
}

impl ProxyCache {
    /// Create a proxy with its own cache token. The proxy starts out [`Lifecycle::New`].
    pub fn new(name: impl Into<String>, config: ProxyConfig, backing: Arc<dyn ProxyBacking>) -> ProxyResult<Self> {
        Self::with_token(name, config, backing, Arc::new(InvalidationToken::new()))
    }

    /// Create a proxy sharing `token` with other proxies of the same store.
    pub fn with_token(
        name: impl Into<String>,
        config: ProxyConfig,
        backing: Arc<dyn ProxyBacking>,
        token: Arc<InvalidationToken>,
    ) -> ProxyResult<Self> {
        let remote_url = config.normalized_remote_url()?;
        let client = build_client(&config)?;
        let name = name.into();
        debug!(proxy = %name, remote = %remote_url, "proxy configured");
        Ok(Self {
            name,
            backing,
            token,
            state: RwLock::new(FacetState {
                lifecycle: Lifecycle::New,
                policy: FreshnessPolicy::from_minutes(config.artifact_max_age_minutes),
                config,
                remote_url,
                client,
                remote_url_changed: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.read().lifecycle
    }

    pub fn remote_url(&self) -> Url {
        self.state.read().remote_url.clone()
    }

    pub fn config(&self) -> ProxyConfig {
        self.state.read().config.clone()
    }

    pub fn token(&self) -> &Arc<InvalidationToken> {
        &self.token
    }

    pub fn start(&self) -> ProxyResult<()> {
        let mut state = self.state.write();
        state
            .lifecycle
            .require("start", &[Lifecycle::New, Lifecycle::Stopped])?;
        if state.remote_url_changed {
            state.remote_url_changed = false;
            let token = self.token.rotate();
            info!(proxy = %self.name, remote = %state.remote_url, token = %token, "remote url changed; proxy caches expired");
        }
        state.lifecycle = Lifecycle::Started;
        info!(proxy = %self.name, remote = %state.remote_url, "proxy started");
        Ok(())
    }

    pub fn stop(&self) -> ProxyResult<()> {
        let mut state = self.state.write();
        state.lifecycle.require("stop", &[Lifecycle::Started])?;
        state.lifecycle = Lifecycle::Stopped;
        info!(proxy = %self.name, "proxy stopped");
        Ok(())
    }

    /// Replace the configuration. Only legal while not started. A changed
    /// remote URL expires all cached content on the next start.
    pub fn update(&self, config: ProxyConfig) -> ProxyResult<()> {
        let remote_url = config.normalized_remote_url()?;
        let client = build_client(&config)?;

        let mut state = self.state.write();
        state
            .lifecycle
            .require("update", &[Lifecycle::New, Lifecycle::Stopped])?;
        if remote_url != state.remote_url {
            state.remote_url_changed = true;
        }
        debug!(proxy = %self.name, remote = %remote_url, changed = state.remote_url_changed, "proxy reconfigured");
        state.policy = FreshnessPolicy::from_minutes(config.artifact_max_age_minutes);
        state.remote_url = remote_url;
        state.client = client;
        state.config = config;
        Ok(())
    }

    /// Expire every cached item of this proxy (and of any proxy sharing its token).
    pub fn invalidate_proxy_caches(&self) -> ProxyResult<String> {
        self.state
            .read()
            .lifecycle
            .require("invalidate proxy caches", &[Lifecycle::Started])?;
        let token = self.token.rotate();
        info!(proxy = %self.name, token = %token, "proxy caches expired");
        Ok(token)
    }

    /// Content for `ctx`, from cache when fresh and from the origin otherwise.
    ///
    /// Fetch failures propagate unless `serve_stale_on_error` is set and stale
    /// content exists. A failed fetch never replaces cached content.
    pub async fn get(&self, ctx: &Context) -> ProxyResult<Option<Content>> {
        let snapshot = self.snapshot("get")?;

        let cached = self.backing.cached(ctx).await?;
        let current_token = self.token.current();
        let staleness = snapshot.policy.evaluate(
            cached.as_ref().map(|c| c.cache_info.as_ref()),
            current_token.as_deref(),
            Utc::now(),
        );
        if !staleness.is_stale() {
            debug!(proxy = %self.name, path = %ctx.path(), "serving from cache");
            return Ok(cached);
        }
        debug!(proxy = %self.name, path = %ctx.path(), reason = %staleness, "content is stale");

        // Release the cached blob before the round trip; storing fresh
        // content deletes it.
        let had_cached = cached.is_some();
        let validators = cached.map(|c| c.content_info).unwrap_or_default();

        // Stamp what was current when the fetch began; a rotation during the
        // round trip must still expire this item.
        match self.fetch(&snapshot, ctx, &validators, current_token.clone()).await {
            Ok(FetchOutcome::Fresh(fresh)) => Ok(Some(self.backing.store(ctx, fresh).await?)),
            Ok(FetchOutcome::NotModified) => {
                let verified = CacheInfo::new(Utc::now(), current_token);
                self.backing.indicate_verified(ctx, verified).await?;
                self.backing.cached(ctx).await
            }
            Err(e) if snapshot.serve_stale_on_error && had_cached && e.is_fetch_failure() => {
                warn!(proxy = %self.name, path = %ctx.path(), error = %e, "fetch failed; serving stale content");
                self.backing.cached(ctx).await
            }
            Err(e) => {
                warn!(proxy = %self.name, path = %ctx.path(), error = %e, "fetch failed");
                Err(e)
            }
        }
    }

    fn snapshot(&self, operation: &'static str) -> ProxyResult<Snapshot> {
        let state = self.state.read();
        state.lifecycle.require(operation, &[Lifecycle::Started])?;
        Ok(Snapshot {
            remote_url: state.remote_url.clone(),
            policy: state.policy,
            client: state.client.clone(),
            serve_stale_on_error: state.config.serve_stale_on_error,
        })
    }

    async fn fetch(
        &self,
        snapshot: &Snapshot,
        ctx: &Context,
        validators: &ContentInfo,
        token: Option<String>,
    ) -> ProxyResult<FetchOutcome> {
        let url = resolve(&snapshot.remote_url, ctx)?;

        let mut request = snapshot.client.get(url.clone());
        if let Some(last_modified) = validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, http::format_http_date(last_modified));
        }
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, http::quote_etag(etag));
        }
        debug!(proxy = %self.name, %url, conditional = validators.has_validators(), "fetching");

        let transport = |source| ProxyError::Transport {
            url: url.to_string(),
            source,
        };
        let mut response = request.send().await.map_err(transport)?;
        let status = response.status();
        debug!(proxy = %self.name, %url, %status, "response");

        match status {
            StatusCode::OK => {
                let content_info = content_info(&url, response.headers());
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);

                let mut body = tokio::fs::File::from_std(tempfile::tempfile()?);
                while let Some(chunk) = response.chunk().await.map_err(transport)? {
                    body.write_all(&chunk).await?;
                }
                body.flush().await?;
                let mut body = body.into_std().await;
                body.rewind()?;

                Ok(FetchOutcome::Fresh(FreshContent {
                    body,
                    content_type,
                    content_info,
                    cache_info: CacheInfo::new(Utc::now(), token),
                }))
            }
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            other => Err(ProxyError::RemoteFetch {
                url: url.to_string(),
                status: other.as_u16(),
            }),
        }
    }
}

/// `ctx` joined onto `base`. The result must stay beneath `base`: same origin,
/// same path prefix, no query or fragment.
fn resolve(base: &Url, ctx: &Context) -> ProxyResult<Url> {
    let url = base
        .join(ctx.path())
        .map_err(|e| ProxyError::InvalidPath(format!("{}: {e}", ctx.path())))?;
    if url.query().is_some() || url.fragment().is_some() || !url.as_str().starts_with(base.as_str()) {
        return Err(ProxyError::InvalidPath(format!("{} escapes {base}", ctx.path())));
    }
    Ok(url)
}

fn content_info(url: &Url, headers: &HeaderMap) -> ContentInfo {
    let last_modified = headers.get(LAST_MODIFIED).and_then(|value| {
        let parsed = value.to_str().ok().and_then(http::parse_http_date);
        if parsed.is_none() {
            warn!(%url, value = ?value, "could not parse Last-Modified; leaving it unset");
        }
        parsed
    });
    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .and_then(http::unquote_etag);
    ContentInfo::new(last_modified, etag)
}

fn build_client(config: &ProxyConfig) -> ProxyResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| ProxyError::Config(format!("failed to build HTTP client: {e}")))
}
