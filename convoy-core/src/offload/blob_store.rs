use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob I/O error: {0}")]
    Io(String),

    #[error("blob failed integrity check: {0}")]
    Integrity(String),

    #[error("blob url not served by this store: {0}")]
    InvalidUrl(String),
}

/// Listing entry for a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobObject {
    pub url: String,
    pub name: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    /// Set by content-addressed stores. Objects with the same key share
    /// one copy of their bytes.
    pub content_key: Option<String>,
}

impl BlobObject {
    /// Identity of the stored bytes: the content key when the store
    /// deduplicates, otherwise the url.
    pub fn storage_key(&self) -> &str {
        self.content_key.as_deref().unwrap_or(&self.url)
    }
}

/// External object storage for result payloads too large to inline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `name`, replacing any previous object.
    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<BlobObject, BlobError>;

    /// `Ok(None)` when nothing is stored at `url`.
    async fn get(&self, url: &str) -> Result<Option<Vec<u8>>, BlobError>;

    async fn list(&self, prefix: &str) -> Result<Vec<BlobObject>, BlobError>;

    async fn delete(&self, url: &str) -> Result<(), BlobError>;
}

/// Strip `scheme` from `url`, yielding the object name.
pub(crate) fn name_from_url<'a>(scheme: &str, url: &'a str) -> Result<&'a str, BlobError> {
    url.strip_prefix(scheme)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| BlobError::InvalidUrl(url.to_string()))
}
