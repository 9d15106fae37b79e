//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid code format: {0}")]
    InvalidCodeFormat(String),

    #[error("Code not available: {0}")]
    CodeNotAvailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Hierarchy cycle detected: {0}")]
    HierarchyCycleDetected(String),

    #[error("Prefix mismatch: {0}")]
    PrefixMismatch(String),

    #[error("Duplicate claim: task {0} was claimed by another courier")]
    DuplicateClaim(Uuid),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Task expired: {0}")]
    TaskExpired(Uuid),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable name used in response bodies
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Migration(_) => "migration",
            AppError::InvalidCodeFormat(_) => "invalid_code_format",
            AppError::CodeNotAvailable(_) => "code_not_available",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::HierarchyCycleDetected(_) => "hierarchy_cycle_detected",
            AppError::PrefixMismatch(_) => "prefix_mismatch",
            AppError::DuplicateClaim(_) => "duplicate_claim",
            AppError::InvalidStateTransition(_) => "invalid_state_transition",
            AppError::TaskExpired(_) => "task_expired",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Migration(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidCodeFormat(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PrefixMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CodeNotAvailable(_)
            | AppError::HierarchyCycleDetected(_)
            | AppError::DuplicateClaim(_)
            | AppError::InvalidStateTransition(_)
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TaskExpired(_) => StatusCode::GONE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            AppError::Migration(e) => {
                tracing::error!("Migration error: {}", e);
                "Database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                "Internal error".to_string()
            }
            AppError::Config(e) => {
                tracing::error!("Configuration error: {}", e);
                format!("Configuration error: {}", e)
            }
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "kind": self.kind(),
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("task".to_string());
        assert_eq!(format!("{}", err), "Not found: task");

        let err = AppError::InvalidCodeFormat("too short".to_string());
        assert_eq!(format!("{}", err), "Invalid code format: too short");

        let id = Uuid::nil();
        let err = AppError::DuplicateClaim(id);
        assert_eq!(
            format!("{}", err),
            format!("Duplicate claim: task {} was claimed by another courier", id)
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(AppError::DuplicateClaim(Uuid::nil()).kind(), "duplicate_claim");
        assert_eq!(AppError::TaskExpired(Uuid::nil()).kind(), "task_expired");
        assert_eq!(
            AppError::HierarchyCycleDetected("x".into()).kind(),
            "hierarchy_cycle_detected"
        );
        assert_eq!(AppError::PrefixMismatch("x".into()).kind(), "prefix_mismatch");
    }

    #[test]
    fn test_permission_denied_is_distinct_from_not_found() {
        let denied = AppError::PermissionDenied("out of scope".into()).into_response();
        let missing = AppError::NotFound("courier".into()).into_response();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_claim_errors_into_response() {
        let response = AppError::DuplicateClaim(Uuid::new_v4()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::TaskExpired(Uuid::new_v4()).into_response();
        assert_eq!(response.status(), StatusCode::GONE);

        let response = AppError::InvalidStateTransition("delivered".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_format_errors_into_response() {
        let response = AppError::InvalidCodeFormat("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::PrefixMismatch("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_database_error_from_sqlx() {
        let sqlx_err = sqlx::Error::Configuration("test".into());
        let app_err: AppError = sqlx_err.into();
        assert!(matches!(app_err, AppError::Database(_)));
        assert_eq!(app_err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_result_type_alias() {
        fn test_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(test_fn().unwrap(), 42);

        fn test_err_fn() -> Result<i32> {
            Err(AppError::NotFound("test".to_string()))
        }
        assert!(test_err_fn().is_err());
    }
}
