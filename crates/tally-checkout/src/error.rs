//! # Checkout Error Types
//!
//! The error taxonomy callers of the coordinator see.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Refusals (nothing persisted, not retried)                             │
//! │  ├── Validation          bad cart, key, reason, discount               │
//! │  ├── NotFound            sale / product / customer / branch            │
//! │  ├── Forbidden           capability or branch scope                    │
//! │  ├── InsufficientStock   caller may resubmit an adjusted cart          │
//! │  └── AlreadyRefunded                                                   │
//! │                                                                         │
//! │  Transient (safe to resubmit with the same idempotency key)            │
//! │  ├── ConcurrencyConflict write lock not won after every retry          │
//! │  └── CommitPending       timed out waiting, may still commit           │
//! │                                                                         │
//! │  System                                                                 │
//! │  ├── System              storage failure, transaction rolled back      │
//! │  └── Internal            task panicked / bad stored data               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tally_core::{CoreError, ValidationError};
use tally_db::DbError;
use thiserror::Error;

/// Result type alias for coordinator operations.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(
        "Insufficient stock for product {product_id} at branch {branch_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: i64,
        branch_id: i64,
        available: i64,
        requested: i64,
    },

    #[error("Sale {sale_number} has already been refunded")]
    AlreadyRefunded { sale_number: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("{0}")]
    Forbidden(String),

    #[error("Could not commit after {attempts} attempts; the database is busy")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Commit for idempotency key '{key}' is still pending; retry with the same key")]
    CommitPending { key: String },

    #[error("Storage error: {0}")]
    System(#[source] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        CheckoutError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Storage failures worth retrying the whole transaction for.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckoutError::System(e) if e.is_transient())
    }
}

impl From<CoreError> for CheckoutError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ProductNotFound(id) => CheckoutError::not_found("Product", id),
            CoreError::BranchNotFound(id) => CheckoutError::not_found("Branch", id),
            CoreError::CustomerNotFound(id) => CheckoutError::not_found("Customer", id),
            CoreError::SaleNotFound(id) => CheckoutError::not_found("Sale", id),
            CoreError::InsufficientStock {
                product_id,
                branch_id,
                available,
                requested,
            } => CheckoutError::InsufficientStock {
                product_id,
                branch_id,
                available,
                requested,
            },
            CoreError::AlreadyRefunded { sale_number } => {
                CheckoutError::AlreadyRefunded { sale_number }
            }
            e @ (CoreError::PermissionDenied { .. } | CoreError::BranchOutOfScope { .. }) => {
                CheckoutError::Forbidden(e.to_string())
            }
            CoreError::Validation(e) => CheckoutError::Validation(e),
        }
    }
}

impl From<DbError> for CheckoutError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Rejected(core) => core.into(),
            DbError::NotFound { entity, id } => CheckoutError::NotFound { entity, id },
            other => CheckoutError::System(other),
        }
    }
}

/// `tx.commit()` hands back a raw sqlx error.
impl From<sqlx::Error> for CheckoutError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}
