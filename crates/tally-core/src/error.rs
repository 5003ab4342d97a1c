//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule rejections                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db         └── DbError        - Storage failures                │
//! │  tally-checkout   └── CheckoutError  - Commit/refund outcome           │
//! │  apps/server      └── ApiError       - What HTTP clients see           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → CheckoutError → ApiError │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule rejections.
///
/// A `CoreError` never means storage is broken. It means the request was
/// understood and refused, and nothing was persisted.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product is unknown to the catalog or inactive.
    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    /// Branch is unknown.
    #[error("Branch not found: {0}")]
    BranchNotFound(i64),

    /// Customer is unknown.
    #[error("Customer not found: {0}")]
    CustomerNotFound(i64),

    /// Sale is unknown.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Not enough available stock for a line.
    ///
    /// ## When This Occurs
    /// ```text
    /// Cart: product 7 × 5 at branch 1
    ///      │
    ///      ▼
    /// inventory(7, 1): current 4, reserved 1 → available 3
    ///      │
    ///      ▼
    /// InsufficientStock { product_id: 7, branch_id: 1, available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// Whole cart rejected, nothing decremented
    /// ```
    #[error(
        "Insufficient stock for product {product_id} at branch {branch_id}: available {available}, requested {requested}"
    )]
    InsufficientStock {
        product_id: i64,
        branch_id: i64,
        available: i64,
        requested: i64,
    },

    /// Sale was already refunded.
    #[error("Sale {sale_number} has already been refunded")]
    AlreadyRefunded { sale_number: String },

    /// Caller's role lacks the capability.
    #[error("Role {role} is not allowed to {capability}")]
    PermissionDenied { role: String, capability: String },

    /// Caller is scoped to a different branch.
    #[error("Caller is not allowed to act on branch {branch_id}")]
    BranchOutOfScope { branch_id: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any storage work starts.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// A collection that must have entries is empty.
    #[error("{field} must not be empty")]
    Empty { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Arithmetic on the request would overflow.
    #[error("{field} is too large to compute")]
    Overflow { field: String },
}

impl ValidationError {
    pub fn out_of_range(field: &str, min: i64, max: i64) -> Self {
        ValidationError::OutOfRange {
            field: field.to_string(),
            min,
            max,
        }
    }

    pub fn overflow(field: &str) -> Self {
        ValidationError::Overflow {
            field: field.to_string(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
