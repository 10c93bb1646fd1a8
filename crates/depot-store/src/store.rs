use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use depot_types::{BlobId, BlobRecord, Headers, BLOB_NAME_HEADER, CREATED_BY_HEADER};
use parking_lot::ArcRwLockWriteGuard;
use tracing::{debug, info, warn};

use crate::blob::Blob;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::file_ops::{FileOperations, SimpleFileOperations};
use crate::location::{LocationStrategy, VolumeChapterLocationStrategy};
use crate::locks::LockArena;
use crate::metadata::{BlobMetadataStore, LogMetadataStore};

/// Content-addressed blob storage.
///
/// Blobs are immutable once created. Deletion is a soft tombstone; the bytes
/// are reclaimed by a later [`BlobStore::compact`].
pub trait BlobStore: Send + Sync {
    /// Stream `data` into a new blob under a fresh id.
    ///
    /// `headers` must carry [`BLOB_NAME_HEADER`] and [`CREATED_BY_HEADER`].
    fn create(&self, data: &mut dyn Read, headers: Headers) -> StoreResult<Blob>;

    /// Open a live blob. Returns `None` for unknown or soft-deleted ids.
    fn get(&self, id: &BlobId) -> StoreResult<Option<Blob>>;

    /// Tombstone a blob. Returns `false` if it was unknown or already deleted.
    fn delete(&self, id: &BlobId) -> StoreResult<bool>;

    /// Like [`BlobStore::delete`], but fails with [`StoreError::LockTimeout`]
    /// at once instead of waiting for open handles to be dropped.
    fn try_delete(&self, id: &BlobId) -> StoreResult<bool>;

    /// Physically remove tombstoned blobs.
    fn compact(&self) -> StoreResult<CompactionReport>;

    /// Records in the store, optionally including tombstoned ones.
    fn list(&self, include_soft_deleted: bool) -> StoreResult<Vec<BlobRecord>>;
}

/// Outcome of one compaction pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Tombstoned blobs whose bytes and record were removed.
    pub reclaimed: u64,
    pub bytes_reclaimed: u64,
    /// Tombstoned blobs left for a later pass because their lock was busy.
    pub skipped: u64,
    /// Whether the metadata log itself was rewritten.
    pub metadata_rewritten: bool,
}

/// Point-in-time counts over the store's records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlobStoreMetrics {
    pub live_blobs: u64,
    pub live_bytes: u64,
    pub deleted_blobs: u64,
    pub deleted_bytes: u64,
}

/// [`BlobStore`] keeping content in sharded files and records in a
/// [`BlobMetadataStore`].
///
/// Every operation on a blob id runs under that id's lock: reads share it,
/// create/delete/compaction take it exclusively. Operations on different ids
/// never block each other.
pub struct FileBlobStore {
    content_dir: PathBuf,
    locations: Box<dyn LocationStrategy>,
    files: Box<dyn FileOperations>,
    metadata: Arc<dyn BlobMetadataStore>,
    locks: LockArena,
    config: StoreConfig,
    started: AtomicBool,
}

impl FileBlobStore {
    /// Assemble a store from its parts. The store starts out stopped.
    pub fn new(
        content_dir: impl Into<PathBuf>,
        locations: Box<dyn LocationStrategy>,
        files: Box<dyn FileOperations>,
        metadata: Arc<dyn BlobMetadataStore>,
        config: StoreConfig,
    ) -> Self {
        Self {
            content_dir: content_dir.into(),
            locations,
            files,
            metadata,
            locks: LockArena::new(),
            config,
            started: AtomicBool::new(false),
        }
    }

    /// Open a store rooted at `root` with the default layout
    /// (`content/` for bytes, `metadata/blobs.log` for records) and start it.
    pub fn open(root: &Path, config: StoreConfig) -> StoreResult<Self> {
        let metadata = LogMetadataStore::open(&root.join("metadata").join("blobs.log"), config.metadata.clone())?;
        let store = Self::new(
            root.join("content"),
            Box::new(VolumeChapterLocationStrategy),
            Box::new(SimpleFileOperations::new(config.sync_content)),
            Arc::new(metadata),
            config,
        );
        store.start()?;
        Ok(store)
    }

    pub fn start(&self) -> StoreResult<()> {
        std::fs::create_dir_all(&self.content_dir)?;
        if !self.started.swap(true, Ordering::SeqCst) {
            info!(content_dir = %self.content_dir.display(), "blob store started");
        }
        Ok(())
    }

    /// Refuse further operations. Open [`Blob`] handles stay readable.
    pub fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            info!(content_dir = %self.content_dir.display(), "blob store stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Absolute path of the content file for `id`.
    pub fn content_path(&self, id: &BlobId) -> PathBuf {
        self.content_dir.join(self.locations.location(id))
    }

    /// Create a blob under a caller-chosen id.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the id already has a record,
    /// live or tombstoned.
    pub fn create_with_id(&self, id: BlobId, data: &mut dyn Read, headers: Headers) -> StoreResult<Blob> {
        self.ensure_started()?;
        for required in [BLOB_NAME_HEADER, CREATED_BY_HEADER] {
            if !headers.contains_key(required) {
                return Err(StoreError::MissingHeader(required));
            }
        }

        let guard = self.locks.exclusive(&id, self.config.lock_timeout())?;
        if self.metadata.get(&id)?.is_some() {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }

        let path = self.content_path(&id);
        let metrics = self.files.create(&path, data)?;
        let record = BlobRecord::new(id, metrics, headers);

        // Nothing may fail once the record is committed.
        let committed = self
            .files
            .open_read(&path)
            .and_then(|content| self.metadata.put(record.clone()).map(|()| content));
        let content = match committed {
            Ok(content) => content,
            Err(e) => {
                if let Err(cleanup) = self.files.delete(&path) {
                    warn!(id = %record.blob_id, error = %cleanup, "failed to remove content after create error");
                }
                return Err(e);
            }
        };
        debug!(id = %record.blob_id, size = metrics.size, sha1 = %metrics.sha1, "blob created");

        Ok(Blob::new(record, content, ArcRwLockWriteGuard::downgrade(guard)))
    }

    pub fn metrics(&self) -> StoreResult<BlobStoreMetrics> {
        let mut metrics = BlobStoreMetrics::default();
        for record in self.metadata.list(true)? {
            if record.is_live() {
                metrics.live_blobs += 1;
                metrics.live_bytes += record.content_size;
            } else {
                metrics.deleted_blobs += 1;
                metrics.deleted_bytes += record.content_size;
            }
        }
        Ok(metrics)
    }

    fn tombstone(&self, id: &BlobId, timeout: Duration) -> StoreResult<bool> {
        self.ensure_started()?;
        let _guard = self.locks.exclusive(id, timeout)?;
        let deleted = self.metadata.mark_deleted(id)?;
        debug!(%id, deleted, "blob delete");
        Ok(deleted)
    }

    fn ensure_started(&self) -> StoreResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(StoreError::Stopped)
        }
    }

    /// Remove one tombstoned blob. Returns the bytes reclaimed, or `None` if
    /// the blob is no longer a tombstone.
    fn reclaim(&self, id: &BlobId) -> StoreResult<Option<u64>> {
        let record = match self.metadata.get(id)? {
            Some(record) if record.soft_deleted => record,
            _ => return Ok(None),
        };
        self.files.delete(&self.content_path(id))?;
        self.metadata.erase(id)?;
        Ok(Some(record.content_size))
    }
}

impl BlobStore for FileBlobStore {
    fn create(&self, data: &mut dyn Read, headers: Headers) -> StoreResult<Blob> {
        self.create_with_id(BlobId::random(), data, headers)
    }

    fn get(&self, id: &BlobId) -> StoreResult<Option<Blob>> {
        self.ensure_started()?;
        let guard = self.locks.shared(id, self.config.lock_timeout())?;

        let record = match self.metadata.get(id)? {
            Some(record) if record.is_live() => record,
            _ => return Ok(None),
        };

        let content = match self.files.open_read(&self.content_path(id)) {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => {
                warn!(%id, "live blob record without content");
                return Err(StoreError::MissingContent(id.clone()));
            }
            Err(e) => return Err(e),
        };
        Ok(Some(Blob::new(record, content, guard)))
    }

    fn delete(&self, id: &BlobId) -> StoreResult<bool> {
        self.tombstone(id, self.config.lock_timeout())
    }

    fn try_delete(&self, id: &BlobId) -> StoreResult<bool> {
        self.tombstone(id, Duration::ZERO)
    }

    fn list(&self, include_soft_deleted: bool) -> StoreResult<Vec<BlobRecord>> {
        self.metadata.list(include_soft_deleted)
    }

    fn compact(&self) -> StoreResult<CompactionReport> {
        self.ensure_started()?;
        let mut report = CompactionReport::default();

        let tombstones: Vec<BlobId> = self
            .metadata
            .list(true)?
            .into_iter()
            .filter(|r| r.soft_deleted)
            .map(|r| r.blob_id)
            .collect();

        for id in tombstones {
            let _guard = match self.locks.exclusive(&id, self.config.compaction_lock_timeout()) {
                Ok(guard) => guard,
                Err(StoreError::LockTimeout(_)) => {
                    debug!(%id, "blob busy; leaving for next compaction");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(bytes) = self.reclaim(&id)? {
                report.reclaimed += 1;
                report.bytes_reclaimed += bytes;
            }
        }

        report.metadata_rewritten = self.metadata.maintain()?;
        info!(
            reclaimed = report.reclaimed,
            bytes = report.bytes_reclaimed,
            skipped = report.skipped,
            "compaction finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use depot_crypto::ContentHasher;
    use std::io;

    fn headers(name: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert(BLOB_NAME_HEADER.into(), name.into());
        headers.insert(CREATED_BY_HEADER.into(), "test".into());
        headers
    }

    fn config() -> StoreConfig {
        StoreConfig {
            lock_timeout_ms: 200,
            compaction_lock_timeout_ms: 50,
            sync_content: false,
            ..StoreConfig::default()
        }
    }

    fn open_store(root: &Path) -> FileBlobStore {
        FileBlobStore::open(root, config()).unwrap()
    }

    fn create(store: &FileBlobStore, data: &[u8]) -> BlobId {
        let blob = store.create(&mut &data[..], headers("a/b.txt")).unwrap();
        blob.id().clone()
    }

    #[test]
    fn hello_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let blob = store.create(&mut &b"hello"[..], headers("greeting.txt")).unwrap();
        assert_eq!(blob.size(), 5);
        assert_eq!(blob.metrics().sha1.to_hex(), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        let id = blob.id().clone();
        drop(blob);

        let blob = store.get(&id).unwrap().unwrap();
        assert_eq!(blob.headers().get(BLOB_NAME_HEADER).unwrap(), "greeting.txt");
        assert_eq!(blob.read_verified().unwrap(), b"hello");
    }

    #[test]
    fn create_requires_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());

        let mut partial = Headers::new();
        partial.insert(BLOB_NAME_HEADER.into(), "x".into());
        let err = store.create(&mut &b"x"[..], partial).unwrap_err();
        assert!(matches!(err, StoreError::MissingHeader(CREATED_BY_HEADER)));
        assert_eq!(store.metrics().unwrap(), BlobStoreMetrics::default());
    }

    #[test]
    fn create_with_existing_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = BlobId::new("fixed").unwrap();

        drop(store.create_with_id(id.clone(), &mut &b"one"[..], headers("x")).unwrap());
        let err = store
            .create_with_id(id.clone(), &mut &b"two"[..], headers("x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert_eq!(store.get(&id).unwrap().unwrap().read_verified().unwrap(), b"one");
    }

    #[test]
    fn get_unknown_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(store.get(&BlobId::random()).unwrap().is_none());
    }

    #[test]
    fn delete_hides_blob_until_compaction_reclaims_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = create(&store, b"doomed");
        let path = store.content_path(&id);

        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert!(store.get(&id).unwrap().is_none());
        assert!(path.exists());

        let report = store.compact().unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.bytes_reclaimed, 6);
        assert!(!path.exists());
        assert!(store.list(true).unwrap().is_empty());
    }

    #[test]
    fn second_compaction_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let keep = create(&store, b"keep");
        let gone = create(&store, b"gone");
        store.delete(&gone).unwrap();

        assert_eq!(store.compact().unwrap().reclaimed, 1);
        let again = store.compact().unwrap();
        assert_eq!(again.reclaimed, 0);
        assert_eq!(again.bytes_reclaimed, 0);
        assert_eq!(again.skipped, 0);
        assert_eq!(store.list(true).unwrap().len(), 1);
        assert!(store.content_path(&keep).exists());
    }

    #[test]
    fn compact_leaves_live_blobs_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let keep = create(&store, b"keep");
        let drop_id = create(&store, b"drop");
        store.delete(&drop_id).unwrap();

        store.compact().unwrap();
        assert_eq!(store.get(&keep).unwrap().unwrap().read_verified().unwrap(), b"keep");
        let metrics = store.metrics().unwrap();
        assert_eq!(metrics.live_blobs, 1);
        assert_eq!(metrics.deleted_blobs, 0);
    }

    #[test]
    fn open_handle_blocks_delete_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = create(&store, b"held");

        let handle = store.get(&id).unwrap().unwrap();
        let err = store.delete(&id).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));

        drop(handle);
        assert!(store.delete(&id).unwrap());
    }

    #[test]
    fn try_delete_does_not_wait_for_readers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path(), StoreConfig {
            lock_timeout_ms: 5_000,
            sync_content: false,
            ..StoreConfig::default()
        })
        .unwrap();
        let id = create(&store, b"held");

        let handle = store.get(&id).unwrap().unwrap();
        let started = std::time::Instant::now();
        let err = store.try_delete(&id).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(1));

        drop(handle);
        assert!(store.try_delete(&id).unwrap());
        assert!(!store.try_delete(&id).unwrap());
    }

    #[test]
    fn compaction_skips_busy_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = create(&store, b"busy");
        store.delete(&id).unwrap();

        let guard = store.locks.shared(&id, store.config().lock_timeout()).unwrap();
        let report = store.compact().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.reclaimed, 0);
        drop(guard);

        assert_eq!(store.compact().unwrap().reclaimed, 1);
    }

    #[test]
    fn missing_content_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = create(&store, b"vanishing");
        std::fs::remove_file(store.content_path(&id)).unwrap();

        let err = store.get(&id).unwrap_err();
        assert!(matches!(err, StoreError::MissingContent(ref missing) if *missing == id));
    }

    #[test]
    fn tampered_content_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = create(&store, b"original");
        std::fs::write(store.content_path(&id), b"tampered").unwrap();

        let err = store.get(&id).unwrap().unwrap().read_verified().unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {err}");
    }

    #[test]
    fn truncated_content_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = create(&store, b"original");
        std::fs::write(store.content_path(&id), b"orig").unwrap();

        let mut reader = store.get(&id).unwrap().unwrap().verified_reader();
        let err = io::copy(&mut reader, &mut io::sink()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unverified_read_returns_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = create(&store, b"plain");

        let mut out = Vec::new();
        store.get(&id).unwrap().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(ContentHasher::sha1(&out), ContentHasher::sha1(b"plain"));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (kept, deleted) = {
            let store = open_store(dir.path());
            let kept = create(&store, b"kept");
            let deleted = create(&store, b"deleted");
            store.delete(&deleted).unwrap();
            (kept, deleted)
        };

        let store = open_store(dir.path());
        assert_eq!(store.get(&kept).unwrap().unwrap().read_verified().unwrap(), b"kept");
        assert!(store.get(&deleted).unwrap().is_none());
        assert_eq!(store.compact().unwrap().reclaimed, 1);
    }

    #[test]
    fn stopped_store_refuses_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let id = create(&store, b"x");
        let handle = store.get(&id).unwrap().unwrap();

        store.stop();
        assert!(matches!(store.get(&id), Err(StoreError::Stopped)));
        assert!(matches!(store.delete(&id), Err(StoreError::Stopped)));
        assert!(matches!(store.compact(), Err(StoreError::Stopped)));
        assert_eq!(handle.read_verified().unwrap(), b"x");

        store.start().unwrap();
        assert!(store.get(&id).unwrap().is_some());
    }

    #[test]
    fn works_with_in_memory_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(
            dir.path(),
            Box::new(VolumeChapterLocationStrategy),
            Box::new(SimpleFileOperations::new(false)),
            Arc::new(InMemoryMetadataStore::new()),
            config(),
        );
        assert!(matches!(store.get(&BlobId::random()), Err(StoreError::Stopped)));
        store.start().unwrap();

        let id = create(&store, b"memory");
        assert!(store.content_path(&id).starts_with(dir.path()));
        assert_eq!(store.get(&id).unwrap().unwrap().read_verified().unwrap(), b"memory");
    }

    /// Real files, but every open for reading fails.
    struct UnreadableFiles(SimpleFileOperations);

    impl FileOperations for UnreadableFiles {
        fn create(&self, path: &Path, data: &mut dyn Read) -> StoreResult<depot_types::StreamMetrics> {
            self.0.create(path, data)
        }

        fn exists(&self, path: &Path) -> StoreResult<bool> {
            self.0.exists(path)
        }

        fn open_read(&self, _path: &Path) -> StoreResult<Box<dyn Read + Send>> {
            Err(StoreError::Io(io::Error::other("injected open failure")))
        }

        fn delete(&self, path: &Path) -> StoreResult<bool> {
            self.0.delete(path)
        }
    }

    #[test]
    fn failed_open_after_create_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::new(
            dir.path(),
            Box::new(VolumeChapterLocationStrategy),
            Box::new(UnreadableFiles(SimpleFileOperations::new(false))),
            Arc::new(InMemoryMetadataStore::new()),
            config(),
        );
        store.start().unwrap();
        let id = BlobId::new("never-committed").unwrap();

        let err = store
            .create_with_id(id.clone(), &mut &b"bytes"[..], headers("x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.list(true).unwrap().is_empty());
        assert!(!store.content_path(&id).exists());
    }

    #[test]
    fn concurrent_create_read_delete_compact() {
        use parking_lot::Mutex;
        use rand::Rng;
        use std::sync::Barrier;
        use std::thread;

        const WORKERS: usize = 8;
        const ROUNDS: usize = 40;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileBlobStore::open(dir.path(), StoreConfig {
            sync_content: false,
            ..StoreConfig::default()
        })
        .unwrap());
        let known: Arc<Mutex<Vec<(BlobId, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let barrier = Arc::new(Barrier::new(WORKERS));

        let handles: Vec<_> = (0..WORKERS)
            .map(|worker| {
                let store = Arc::clone(&store);
                let known = Arc::clone(&known);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    barrier.wait();
                    for round in 0..ROUNDS {
                        match rng.gen_range(0..10) {
                            0..=3 => {
                                let data = format!("worker {worker} round {round}").into_bytes();
                                let blob = store.create(&mut &data[..], headers("c")).unwrap();
                                known.lock().push((blob.id().clone(), data));
                            }
                            4..=7 => {
                                let picked = {
                                    let known = known.lock();
                                    if known.is_empty() {
                                        continue;
                                    }
                                    known[rng.gen_range(0..known.len())].clone()
                                };
                                if let Some(blob) = store.get(&picked.0).unwrap() {
                                    assert_eq!(blob.read_verified().unwrap(), picked.1);
                                }
                            }
                            8 => {
                                let picked = {
                                    let known = known.lock();
                                    if known.is_empty() {
                                        continue;
                                    }
                                    known[rng.gen_range(0..known.len())].0.clone()
                                };
                                store.delete(&picked).unwrap();
                            }
                            _ => {
                                store.compact().unwrap();
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        store.compact().unwrap();
        for record in store.list(true).unwrap() {
            assert!(record.is_live());
            let data = store.get(&record.blob_id).unwrap().unwrap().read_verified().unwrap();
            assert_eq!(data.len() as u64, record.content_size);
        }
    }
}
