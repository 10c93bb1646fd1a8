use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use depot_types::BlobId;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use tracing::trace;

use crate::error::{StoreError, StoreResult};

/// Shared hold on one blob. Readers keep it for as long as they stream content.
pub type SharedGuard = ArcRwLockReadGuard<RawRwLock, ()>;

/// Exclusive hold on one blob, taken by create, delete, and compaction.
pub type ExclusiveGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

const MIN_PRUNE_AT: usize = 1024;

struct Table {
    locks: HashMap<BlobId, Weak<RwLock<()>>>,
    prune_at: usize,
}

/// Per-blob reader/writer locks, created on demand.
///
/// The table only holds weak references; a lock lives as long as some guard
/// or caller holds it. Dead entries are swept whenever the table doubles past
/// its last swept size.
pub struct LockArena {
    table: Mutex<Table>,
}

impl LockArena {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                locks: HashMap::new(),
                prune_at: MIN_PRUNE_AT,
            }),
        }
    }

    fn lock_for(&self, id: &BlobId) -> Arc<RwLock<()>> {
        let mut table = self.table.lock();
        if let Some(lock) = table.locks.get(id).and_then(Weak::upgrade) {
            return lock;
        }

        let lock = Arc::new(RwLock::new(()));
        table.locks.insert(id.clone(), Arc::downgrade(&lock));

        if table.locks.len() > table.prune_at {
            let before = table.locks.len();
            table.locks.retain(|_, weak| weak.strong_count() > 0);
            table.prune_at = (table.locks.len() * 2).max(MIN_PRUNE_AT);
            trace!(before, after = table.locks.len(), "pruned blob lock table");
        }
        lock
    }

    /// Acquire a shared lock on `id`, waiting at most `timeout`.
    pub fn shared(&self, id: &BlobId, timeout: Duration) -> StoreResult<SharedGuard> {
        self.lock_for(id)
            .try_read_arc_for(timeout)
            .ok_or_else(|| StoreError::LockTimeout(id.clone()))
    }

    /// Acquire an exclusive lock on `id`, waiting at most `timeout`.
    pub fn exclusive(&self, id: &BlobId, timeout: Duration) -> StoreResult<ExclusiveGuard> {
        self.lock_for(id)
            .try_write_arc_for(timeout)
            .ok_or_else(|| StoreError::LockTimeout(id.clone()))
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.table.lock().locks.len()
    }
}

impl Default for LockArena {
    fn default() -> Self {
        Self::new()
    }
}
