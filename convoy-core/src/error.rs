use thiserror::Error;

use crate::{offload::BlobError, store::StoreError};

#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write conflict on {0}: retries exhausted")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<convoy_model::ModelError> for CoordinationError {
    fn from(err: convoy_model::ModelError) -> Self {
        CoordinationError::InvalidInput(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
