//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use wove_types::error::{AttachmentError, RepositoryError};
use wove_types::llm::GenerationError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Persistence errors.
    Repository(RepositoryError),
    /// Upstream generation errors raised before the stream opened.
    Generation(GenerationError),
    /// Missing or malformed owner.
    Unauthorized(String),
    /// Validation error.
    Validation(String),
    /// The server cannot serve the route in its current configuration.
    Unavailable(String),
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl From<GenerationError> for AppError {
    fn from(e: GenerationError) -> Self {
        AppError::Generation(e)
    }
}

impl From<AttachmentError> for AppError {
    fn from(e: AttachmentError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            // Ownership is never revealed: foreign and missing rows look alike.
            AppError::Repository(RepositoryError::NotFoundOrForbidden) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Session or message not found".to_string(),
            ),
            AppError::Repository(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PERSISTENCE_ERROR",
                e.to_string(),
            ),
            AppError::Generation(GenerationError::InvalidRequest(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Generation(e) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", e.to_string()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::warn!(code, %message, "Request failed");
        }

        let body = ApiResponse::error(code, &message, Uuid::now_v7().to_string(), 0);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_or_forbidden_is_404() {
        let (status, code, message) = AppError::from(RepositoryError::NotFoundOrForbidden).parts();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "NOT_FOUND");
        assert!(!message.to_lowercase().contains("forbidden"));
    }

    #[test]
    fn test_upstream_failure_is_bad_gateway() {
        let err = AppError::from(GenerationError::Status {
            status: 500,
            message: "boom".to_string(),
        });
        assert_eq!(err.parts().0, StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::from(GenerationError::AuthenticationFailed).parts().0,
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_invalid_attachment_is_validation_error() {
        let err = AppError::from(AttachmentError::NotAnImage("text/plain".to_string()));
        let (status, code, _) = err.parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "VALIDATION_ERROR");
    }
}
