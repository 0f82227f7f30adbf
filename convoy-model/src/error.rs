use std::fmt::{self, Display};

/// Errors produced by model parsing and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownCounter(String),
    UnknownStatus(String),
    InvalidId(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownCounter(raw) => {
                write!(f, "unknown counter kind: {raw}")
            }
            ModelError::UnknownStatus(raw) => write!(f, "unknown status: {raw}"),
            ModelError::InvalidId(msg) => write!(f, "invalid id: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
