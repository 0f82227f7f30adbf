use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::blob_store::{BlobError, BlobObject, BlobStore, name_from_url};
use crate::time::TimeProvider;

const SCHEME: &str = "cacache://";

/// On-disk blob store backed by `cacache`: content-addressed, with every
/// read checked against the integrity hash recorded at write time.
#[derive(Clone)]
pub struct CacheBlobStore {
    root: PathBuf,
    clock: Arc<dyn TimeProvider>,
}

impl fmt::Debug for CacheBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBlobStore")
            .field("root", &self.root)
            .finish()
    }
}

fn map_cacache_error(name: &str, err: cacache::Error) -> BlobError {
    match err {
        cacache::Error::EntryNotFound(_, _) => BlobError::NotFound(name.to_string()),
        cacache::Error::IntegrityError(err) => {
            BlobError::Integrity(format!("{name} ({err})"))
        }
        cacache::Error::SizeMismatch(wanted, actual) => BlobError::Integrity(format!(
            "size mismatch: name={name}, wanted={wanted}, actual={actual}"
        )),
        cacache::Error::IoError(_, msg) => BlobError::Io(msg),
        cacache::Error::SerdeError(_, msg) => BlobError::Io(msg),
    }
}

impl CacheBlobStore {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_for(name: &str) -> String {
        format!("{SCHEME}{name}")
    }

    /// Live index entries. A cache directory that was never written to
    /// has no index yet.
    async fn entries(&self) -> Result<Vec<cacache::Metadata>, BlobError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            if !root.exists() {
                return Vec::new();
            }
            cacache::list_sync(root.as_path())
                .filter_map(|entry| entry.ok())
                .collect()
        })
        .await
        .map_err(|e| BlobError::Io(format!("listing task failed: {e}")))
    }
}

#[async_trait]
impl BlobStore for CacheBlobStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<BlobObject, BlobError> {
        let integrity = cacache::write(self.root.as_path(), name, &bytes)
            .await
            .map_err(|e| map_cacache_error(name, e))?;

        Ok(BlobObject {
            url: Self::url_for(name),
            name: name.to_string(),
            size_bytes: bytes.len() as u64,
            created_at: self.clock.utc_now(),
            content_key: Some(integrity.to_string()),
        })
    }

    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let name = name_from_url(SCHEME, url)?;
        match cacache::read(self.root.as_path(), name).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(err) => Err(map_cacache_error(name, err)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>, BlobError> {
        let prefix = prefix.to_string();
        let entries = self.entries().await?;
        Ok(entries
            .into_iter()
            .filter(|meta| meta.key.starts_with(&prefix))
            .map(|meta| {
                // `cacache` records unix millis in `time`.
                let millis = i64::try_from(meta.time).unwrap_or(i64::MAX);
                BlobObject {
                    url: CacheBlobStore::url_for(&meta.key),
                    size_bytes: meta.size as u64,
                    created_at: DateTime::<Utc>::from_timestamp_millis(millis)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                    content_key: Some(meta.integrity.to_string()),
                    name: meta.key,
                }
            })
            .collect())
    }

    /// Drops the entry for `url`. Identical payloads share one content
    /// file, which is only removed once no other entry points at it.
    async fn delete(&self, url: &str) -> Result<(), BlobError> {
        let name = name_from_url(SCHEME, url)?;
        let Some(meta) = cacache::metadata(self.root.as_path(), name)
            .await
            .map_err(|e| map_cacache_error(name, e))?
        else {
            return Ok(());
        };

        cacache::index::RemoveOpts::new()
            .remove_fully(false)
            .remove(self.root.as_path(), name)
            .await
            .map_err(|e| map_cacache_error(name, e))?;

        let integrity = meta.integrity.to_string();
        let shared = self
            .entries()
            .await?
            .iter()
            .any(|entry| entry.integrity.to_string() == integrity);
        if shared {
            debug!(name, "Blob content still referenced, keeping it");
            return Ok(());
        }
        cacache::remove_hash(self.root.as_path(), &meta.integrity)
            .await
            .map_err(|e| map_cacache_error(name, e))
    }
}
