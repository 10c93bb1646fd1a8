use std::collections::HashMap;

use depot_types::{BlobId, BlobRecord};
use parking_lot::RwLock;

use super::BlobMetadataStore;
use crate::error::StoreResult;

/// In-memory metadata store. Contents are lost when dropped.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<HashMap<BlobId, BlobRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl BlobMetadataStore for InMemoryMetadataStore {
    fn put(&self, record: BlobRecord) -> StoreResult<()> {
        self.records.write().insert(record.blob_id.clone(), record);
        Ok(())
    }

    fn get(&self, id: &BlobId) -> StoreResult<Option<BlobRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn mark_deleted(&self, id: &BlobId) -> StoreResult<bool> {
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(record) if record.is_live() => {
                record.soft_deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn erase(&self, id: &BlobId) -> StoreResult<bool> {
        Ok(self.records.write().remove(id).is_some())
    }

    fn list(&self, include_soft_deleted: bool) -> StoreResult<Vec<BlobRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| include_soft_deleted || r.is_live())
            .cloned()
            .collect())
    }
}
