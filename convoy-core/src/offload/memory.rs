use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::blob_store::{BlobError, BlobObject, BlobStore, name_from_url};
use crate::time::TimeProvider;

const SCHEME: &str = "memory://";

/// In-process blob store for tests and single-worker setups.
pub struct MemoryBlobStore {
    clock: Arc<dyn TimeProvider>,
    objects: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("objects", &self.objects.lock().len())
            .finish()
    }
}

impl MemoryBlobStore {
    pub fn new(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            clock,
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> u64 {
        self.objects
            .lock()
            .values()
            .map(|(bytes, _)| bytes.len() as u64)
            .sum()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<BlobObject, BlobError> {
        let created_at = self.clock.utc_now();
        let size_bytes = bytes.len() as u64;
        self.objects
            .lock()
            .insert(name.to_string(), (bytes, created_at));
        Ok(BlobObject {
            url: format!("{SCHEME}{name}"),
            name: name.to_string(),
            size_bytes,
            created_at,
            content_key: None,
        })
    }

    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let name = name_from_url(SCHEME, url)?;
        Ok(self
            .objects
            .lock()
            .get(name)
            .map(|(bytes, _)| bytes.clone()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>, BlobError> {
        Ok(self
            .objects
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, (bytes, created_at))| BlobObject {
                url: format!("{SCHEME}{name}"),
                name: name.clone(),
                size_bytes: bytes.len() as u64,
                created_at: *created_at,
                content_key: None,
            })
            .collect())
    }

    async fn delete(&self, url: &str) -> Result<(), BlobError> {
        let name = name_from_url(SCHEME, url)?;
        self.objects.lock().remove(name);
        Ok(())
    }
}
