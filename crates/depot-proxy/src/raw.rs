use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use depot_store::{BlobStore, StoreError};
use depot_types::{BlobId, Headers, BLOB_NAME_HEADER, CONTENT_TYPE_HEADER, CREATED_BY_HEADER};
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use tracing::{debug, info, trace, warn};

use crate::attributes::{AssetAttributes, AttributeStorage};
use crate::backing::{Content, Context, FreshContent, ProxyBacking};
use crate::error::ProxyResult;
use crate::info::CacheInfo;

const MIN_PRUNE_AT: usize = 256;

/// One mutex per cached path, created on demand and held across each
/// read-modify-write of that path's attribute document.
struct PathLocks {
    table: Mutex<(HashMap<String, Weak<Mutex<()>>>, usize)>,
}

impl Default for PathLocks {
    fn default() -> Self {
        Self {
            table: Mutex::new((HashMap::new(), MIN_PRUNE_AT)),
        }
    }
}

impl PathLocks {
    fn lock(&self, ctx: &Context) -> ArcMutexGuard<RawMutex, ()> {
        let lock = {
            let mut guard = self.table.lock();
            let (locks, prune_at) = &mut *guard;
            match locks.get(ctx.path()).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(Mutex::new(()));
                    locks.insert(ctx.path().to_string(), Arc::downgrade(&lock));
                    if locks.len() > *prune_at {
                        let before = locks.len();
                        locks.retain(|_, weak| weak.strong_count() > 0);
                        *prune_at = (locks.len() * 2).max(MIN_PRUNE_AT);
                        trace!(before, after = locks.len(), "pruned path lock table");
                    }
                    lock
                }
            }
        };
        lock.lock_arc()
    }
}

/// Outcome of one [`RawProxyStore::sweep`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Unreferenced blobs that were tombstoned.
    pub discarded: u64,
    /// Unreferenced blobs left live because a reader still had them open.
    pub busy: u64,
}

/// Path-addressed proxy storage: bytes in a [`BlobStore`], one attribute
/// document per path pointing at the current blob.
///
/// Blob store calls are blocking and run on tokio's blocking pool. Writes to
/// one path are serialized; a replaced blob that is still being read stays
/// live until [`RawProxyStore::sweep`] finds it unreferenced.
#[derive(Clone)]
pub struct RawProxyStore {
    blobs: Arc<dyn BlobStore>,
    attributes: Arc<AttributeStorage>,
    created_by: Arc<str>,
    paths: Arc<PathLocks>,
}

impl RawProxyStore {
    pub fn new(blobs: Arc<dyn BlobStore>, attributes: AttributeStorage, created_by: impl Into<String>) -> Self {
        Self {
            blobs,
            attributes: Arc::new(attributes),
            created_by: Arc::from(created_by.into()),
            paths: Arc::default(),
        }
    }

    pub fn attributes(&self) -> &AttributeStorage {
        &self.attributes
    }

    fn cached_blocking(&self, ctx: &Context) -> ProxyResult<Option<Content>> {
        let Some(attrs) = self.attributes.read(ctx)? else {
            return Ok(None);
        };
        let blob = match self.blobs.get(&attrs.blob_id) {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                warn!(path = %ctx.path(), blob_id = %attrs.blob_id, "attributes point at a deleted blob");
                return Ok(None);
            }
            Err(StoreError::MissingContent(id)) => {
                warn!(path = %ctx.path(), blob_id = %id, "cached blob has lost its content");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Content::new(
            blob,
            attrs.content_type,
            attrs.content_info,
            attrs.cache_info,
        )))
    }

    fn store_blocking(&self, ctx: &Context, fresh: FreshContent) -> ProxyResult<Content> {
        let mut headers = Headers::new();
        headers.insert(BLOB_NAME_HEADER.to_string(), ctx.path().to_string());
        headers.insert(CREATED_BY_HEADER.to_string(), self.created_by.to_string());
        if let Some(content_type) = &fresh.content_type {
            headers.insert(CONTENT_TYPE_HEADER.to_string(), content_type.clone());
        }

        let FreshContent {
            mut body,
            content_type,
            content_info,
            cache_info,
        } = fresh;

        let _path = self.paths.lock(ctx);
        let previous = self.attributes.read(ctx)?;
        let blob = self.blobs.create(&mut body, headers)?;
        let attrs = AssetAttributes {
            blob_id: blob.id().clone(),
            content_type,
            content_info,
            cache_info: Some(cache_info),
        };
        if let Err(e) = self.attributes.write(ctx, &attrs) {
            let orphan = blob.id().clone();
            drop(blob);
            self.discard(&orphan);
            return Err(e);
        }

        if let Some(previous) = previous.filter(|p| p.blob_id != attrs.blob_id) {
            self.discard(&previous.blob_id);
        }
        debug!(path = %ctx.path(), blob_id = %attrs.blob_id, size = blob.size(), "stored fresh content");

        Ok(Content::new(
            blob,
            attrs.content_type,
            attrs.content_info,
            attrs.cache_info,
        ))
    }

    fn indicate_verified_blocking(&self, ctx: &Context, cache_info: CacheInfo) -> ProxyResult<()> {
        let _path = self.paths.lock(ctx);
        let Some(mut attrs) = self.attributes.read(ctx)? else {
            debug!(path = %ctx.path(), "nothing cached to mark verified");
            return Ok(());
        };
        attrs.cache_info = Some(cache_info);
        self.attributes.write(ctx, &attrs)
    }

    /// Tombstone a blob that is no longer referenced, without waiting on
    /// readers. Whatever is left live here is picked up by the next sweep.
    fn discard(&self, id: &BlobId) {
        match self.blobs.try_delete(id) {
            Ok(_) => {}
            Err(StoreError::LockTimeout(_)) => {
                debug!(blob_id = %id, "replaced blob still open; leaving it for the next sweep");
            }
            Err(e) => warn!(blob_id = %id, error = %e, "failed to delete unreferenced blob"),
        }
    }

    fn sweep_blocking(&self) -> ProxyResult<SweepReport> {
        let mut report = SweepReport::default();
        for record in self.blobs.list(false)? {
            if record.headers.get(CREATED_BY_HEADER).map(String::as_str) != Some(&*self.created_by) {
                continue;
            }
            let Some(ctx) = record.headers.get(BLOB_NAME_HEADER).and_then(|name| Context::new(name).ok()) else {
                continue;
            };

            let _path = self.paths.lock(&ctx);
            let referenced = self
                .attributes
                .read(&ctx)?
                .is_some_and(|attrs| attrs.blob_id == record.blob_id);
            if referenced {
                continue;
            }
            match self.blobs.try_delete(&record.blob_id) {
                Ok(true) => report.discarded += 1,
                Ok(false) => {}
                Err(StoreError::LockTimeout(_)) => report.busy += 1,
                Err(e) => return Err(e.into()),
            }
        }
        info!(discarded = report.discarded, busy = report.busy, "proxy sweep finished");
        Ok(report)
    }

    /// Tombstone blobs written by this store that no path refers to any more:
    /// replaced blobs that were still open when replaced, and leftovers of an
    /// interrupted store. Blobs that are still open are counted and skipped.
    pub async fn sweep(&self) -> ProxyResult<SweepReport> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.sweep_blocking()).await?
    }
}

#[async_trait]
impl ProxyBacking for RawProxyStore {
    async fn cached(&self, ctx: &Context) -> ProxyResult<Option<Content>> {
        let this = self.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || this.cached_blocking(&ctx)).await?
    }

    async fn store(&self, ctx: &Context, fresh: FreshContent) -> ProxyResult<Content> {
        let this = self.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || this.store_blocking(&ctx, fresh)).await?
    }

    async fn indicate_verified(&self, ctx: &Context, cache_info: CacheInfo) -> ProxyResult<()> {
        let this = self.clone();
        let ctx = ctx.clone();
        tokio::task::spawn_blocking(move || this.indicate_verified_blocking(&ctx, cache_info)).await?
    }
}
