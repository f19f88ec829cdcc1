//! API errors rendered as `{"message": ...}` bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::error;

use crate::storage::StorageError;

pub const GENERIC_FAILURE: &str = "Something went wrong!";

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(MessageBody::new(self.message()))).into_response()
    }
}

/// Default mapping. Handlers that need operation-specific wording match the
/// expected variants themselves and fall back to this.
impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::PathEscape => ApiError::BadRequest("invalid path".into()),
            StorageError::AlreadyExists => ApiError::Conflict("already exists".into()),
            StorageError::NotFound => ApiError::NotFound("not found".into()),
            StorageError::Io(err) => {
                error!(error = %err, "storage io failure");
                ApiError::Internal(GENERIC_FAILURE.into())
            }
        }
    }
}
