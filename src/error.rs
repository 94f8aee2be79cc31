use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::job_queries::JobStoreError;
use crate::models::job::InputError;
use crate::services::queue::QueueError;

/// Synchronous-path errors surfaced by the HTTP layer. Asynchronous failures
/// never appear here; they land in the job record's `error` field.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("AI processing is disabled")]
    AiDisabled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<InputError> for AppError {
    fn from(err: InputError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<JobStoreError> for AppError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => AppError::NotFound(format!("job {id}")),
            // A bad transition on the HTTP path is a programming bug, not
            // user input; logged by the caller and surfaced as a 500.
            JobStoreError::InvalidTransition { .. } => AppError::Internal(err.to_string()),
            JobStoreError::Database(e) => AppError::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AiDisabled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Queue(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
