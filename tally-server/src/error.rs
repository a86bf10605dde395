//! HTTP error mapping. Internal stack traces never cross the boundary:
//! clients see run/stage details and messages only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tally_core::errors::{AnalysisError, ReadError, RunError, StorageError};

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::RunNotFound { run_id } => {
                ApiError::not_found(format!("run {run_id} not found"))
            }
            other => {
                tracing::error!(error = %other, "storage error serving request");
                ApiError::internal("storage error")
            }
        }
    }
}

impl From<RunError> for ApiError {
    fn from(e: RunError) -> Self {
        match &e {
            RunError::Read(ReadError::FileNotFound { path }) => {
                ApiError::bad_request(format!("file not found: {path}"))
            }
            RunError::Read(other) => ApiError::bad_request(other.to_string()),
            RunError::Analysis(AnalysisError::Parameter { message }) => {
                ApiError::bad_request(message.clone())
            }
            RunError::Storage(StorageError::RunNotFound { run_id }) => {
                ApiError::not_found(format!("run {run_id} not found"))
            }
            other => {
                tracing::error!(error = %other, "internal error serving request");
                ApiError::internal("internal error")
            }
        }
    }
}
