use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metadata::LogConfig;

/// Tuning for a [`crate::FileBlobStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long get, create, and delete wait for a blob's lock.
    pub lock_timeout_ms: u64,
    /// How long compaction waits per blob before skipping it for this pass.
    pub compaction_lock_timeout_ms: u64,
    /// `fsync` content files before a create returns.
    pub sync_content: bool,
    pub metadata: LogConfig,
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn compaction_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.compaction_lock_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 30_000,
            compaction_lock_timeout_ms: 500,
            sync_content: true,
            metadata: LogConfig::default(),
        }
    }
}
