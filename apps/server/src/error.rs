//! # API Error Handling
//!
//! Every failure leaves the server as the same JSON shape:
//!
//! ```json
//! { "code": "INSUFFICIENT_STOCK", "message": "Insufficient stock for product 7 ..." }
//! ```
//!
//! ## Status Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CheckoutError              code                    status              │
//! │  ─────────────────────────  ──────────────────────  ──────              │
//! │  Validation                 VALIDATION_ERROR        400                 │
//! │  (missing caller headers)   UNAUTHORIZED            401                 │
//! │  Forbidden                  FORBIDDEN               403                 │
//! │  NotFound                   NOT_FOUND               404                 │
//! │  InsufficientStock          INSUFFICIENT_STOCK      409                 │
//! │  AlreadyRefunded            ALREADY_REFUNDED        409                 │
//! │  ConcurrencyConflict        CONCURRENCY_CONFLICT    503                 │
//! │  CommitPending              COMMIT_PENDING          503                 │
//! │  System / Internal          SYSTEM_ERROR            500                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! System failures are logged in full and reach the client as a generic
//! message.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use tally_checkout::CheckoutError;

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    Forbidden,
    NotFound,
    InsufficientStock,
    AlreadyRefunded,
    ConcurrencyConflict,
    CommitPending,
    SystemError,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InsufficientStock | ErrorCode::AlreadyRefunded => StatusCode::CONFLICT,
            ErrorCode::ConcurrencyConflict | ErrorCode::CommitPending => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::SystemError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned by every handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        let code = match &err {
            CheckoutError::Validation(_) => ErrorCode::ValidationError,
            CheckoutError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            CheckoutError::AlreadyRefunded { .. } => ErrorCode::AlreadyRefunded,
            CheckoutError::NotFound { .. } => ErrorCode::NotFound,
            CheckoutError::Forbidden(_) => ErrorCode::Forbidden,
            CheckoutError::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            CheckoutError::CommitPending { .. } => ErrorCode::CommitPending,
            CheckoutError::System(_) | CheckoutError::Internal(_) => {
                error!(error = %err, "Request failed with a system error");
                return ApiError::new(ErrorCode::SystemError, "Internal server error");
            }
        };
        ApiError::new(code, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ValidationError;

    #[test]
    fn test_code_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::InsufficientStock).unwrap(),
            "\"INSUFFICIENT_STOCK\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::ValidationError).unwrap(),
            "\"VALIDATION_ERROR\""
        );
    }

    #[test]
    fn test_checkout_error_mapping() {
        let err: ApiError = CheckoutError::InsufficientStock {
            product_id: 7,
            branch_id: 1,
            available: 2,
            requested: 3,
        }
        .into();
        assert_eq!(err.code, ErrorCode::InsufficientStock);
        assert_eq!(err.code.status(), StatusCode::CONFLICT);

        let err: ApiError = CheckoutError::Validation(ValidationError::Empty {
            field: "lines".into(),
        })
        .into();
        assert_eq!(err.code.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = CheckoutError::CommitPending { key: "k".into() }.into();
        assert_eq!(err.code.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_system_errors_hide_details() {
        let err: ApiError = CheckoutError::Internal("join handle panicked at db.rs".into()).into();
        assert_eq!(err.code, ErrorCode::SystemError);
        assert_eq!(err.message, "Internal server error");
    }
}
