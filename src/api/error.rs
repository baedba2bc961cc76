//! Unified API error handling.
//!
//! Every failure path in the API is converted into an [`ApiError`] at the
//! point of detection and rendered by a single [`IntoResponse`] impl, which
//! is the only place that inspects the deployment environment to decide
//! verbosity. The wire format is `{"status": "fail"|"error", "message"}`,
//! with `fail` for 4xx and `error` for 5xx.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set once at startup; suppresses error detail in responses.
static PRODUCTION: AtomicBool = AtomicBool::new(false);

pub fn set_production_mode(on: bool) {
    PRODUCTION.store(on, Ordering::Relaxed);
}

fn production_mode() -> bool {
    PRODUCTION.load(Ordering::Relaxed)
}

/// The error response envelope
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
    /// Underlying error text, included only outside production mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Unified API error type
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach underlying error text, surfaced only in development mode
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    // -------------------------------------------------------------------------
    // Convenience constructors for common error types
    // -------------------------------------------------------------------------

    /// Bad request error (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Unauthorized error (401) - authentication required
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// Forbidden error (403) - authenticated but not allowed
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    /// Not found error (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Conflict error (409) - duplicate unique value or state conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Internal server error (500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_word = if self.status.is_client_error() {
            "fail"
        } else {
            "error"
        };

        let (message, detail) = if production_mode() && self.status.is_server_error() {
            // Never leak internals in production
            ("Something went wrong".to_string(), None)
        } else {
            (self.message, self.detail.filter(|_| !production_mode()))
        };

        let body = ErrorResponse {
            status: status_word,
            message,
            detail,
        };

        (self.status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::not_found("No document found with this ID"),
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                if msg.contains("UNIQUE constraint failed") {
                    ApiError::bad_request("Duplicate field value. Please use another value")
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    ApiError::bad_request("Referenced document does not exist")
                } else {
                    tracing::error!("Database error: {}", err);
                    ApiError::internal("A database error occurred").with_detail(err.to_string())
                }
            }
            _ => {
                tracing::error!("Database error: {}", err);
                ApiError::internal("A database error occurred").with_detail(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_statuses() {
        assert_eq!(ApiError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::internal("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn sqlx_unique_violation_maps_to_400() {
        // RowNotFound is the only sqlx variant constructible without a live DB
        let err = ApiError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn detail_is_dev_only() {
        let err = ApiError::internal("boom").with_detail("stack");
        assert_eq!(err.detail.as_deref(), Some("stack"));
    }
}
