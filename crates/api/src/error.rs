use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use gridpilot_core::error::CoreError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and implements [`IntoResponse`] to produce
/// consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `gridpilot_core`.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::AlreadyRunning { entity_id } => (
                    StatusCode::CONFLICT,
                    "ALREADY_RUNNING",
                    format!("Instance {entity_id} already has a running process"),
                ),
                CoreError::NotReady { job_id } => (
                    StatusCode::CONFLICT,
                    "NOT_READY",
                    format!("Job {job_id} has not completed; results are not available"),
                ),
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Spawn { program, source } => {
                    tracing::error!(program = %program, error = %source, "Process spawn failed");
                    (
                        StatusCode::BAD_GATEWAY,
                        "SPAWN_FAILED",
                        format!("Failed to launch {program}"),
                    )
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
