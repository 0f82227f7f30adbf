use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use convoy_core::CoordinationError;
use convoy_model::ModelError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<CoordinationError> for AppError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::NotFound(what) => Self::not_found(format!("{what} not found")),
            CoordinationError::Conflict(key) => {
                Self::conflict(format!("concurrent updates to {key}; retry the request"))
            }
            CoordinationError::InvalidInput(msg) => Self::bad_request(msg),
            other => {
                tracing::error!(error = %other, "coordination operation failed");
                Self::internal("Coordination store operation failed")
            }
        }
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}
