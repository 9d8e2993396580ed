//! HTTP error type and JSON error bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::queue::QueueError;

/// Error returned by route handlers.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Malformed or missing input.
    #[error("{0}")]
    BadRequest(String),

    /// Referenced item is not where the operation expects it.
    #[error("{0}")]
    NotFound(String),

    /// An item with the same id already exists.
    #[error("{0}")]
    Conflict(String),
}

/// JSON error response body: `{"error": "..."}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Conflict(_) => StatusCode::CONFLICT,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<QueueError> for HttpError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::ItemNotFound(_) | QueueError::CannotMove { .. } => {
                HttpError::NotFound(err.to_string())
            }
            QueueError::AlreadyQueued(_) => HttpError::Conflict(err.to_string()),
        }
    }
}
