//! # Validation Module
//!
//! Shape checks run before any storage work.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP (serde)                                                 │
//! │  └── Types and required fields                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Cart shape (non-empty, positive quantities)                       │
//! │  ├── Idempotency key format                                            │
//! │  └── Free-text limits (notes, refund reason)                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                       │
//! │  ├── CHECK (current_stock >= 0)                                        │
//! │  ├── UNIQUE (sale_number)                                              │
//! │  └── Foreign keys                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::types::CartLine;
use crate::{BPS_SCALE, MAX_CART_LINES, MAX_IDEMPOTENCY_KEY_LEN, MAX_LINE_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of sale notes.
pub const MAX_NOTES_LEN: usize = 1_000;

/// Maximum length of a refund reason.
pub const MAX_REASON_LEN: usize = 500;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_LINE_QUANTITY
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_quantity;
///
/// assert!(validate_quantity(5).is_ok());
/// assert!(validate_quantity(0).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::out_of_range("quantity", 1, MAX_LINE_QUANTITY));
    }

    Ok(())
}

/// Validates a price in cents. Zero is allowed (free items).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::out_of_range("price", 0, i64::MAX));
    }

    Ok(())
}

/// Validates a tax rate in basis points (0% to 100%).
pub fn validate_tax_rate_bps(bps: u32) -> ValidationResult<()> {
    if bps > BPS_SCALE {
        return Err(ValidationError::out_of_range("tax_rate", 0, BPS_SCALE as i64));
    }

    Ok(())
}

/// Validates a stock count used by adjustments. Zero is a valid count.
pub fn validate_stock_count(count: i64) -> ValidationResult<()> {
    if count < 0 {
        return Err(ValidationError::out_of_range("count", 0, i64::MAX));
    }

    Ok(())
}

// =============================================================================
// Cart Validators
// =============================================================================

/// Validates the shape of a submitted cart.
///
/// ## Rules
/// - At least one line, at most MAX_CART_LINES
/// - Every product id positive
/// - Every quantity valid per [`validate_quantity`]
///
/// The same product may appear on several lines. The stock ledger adds them
/// up before checking availability.
pub fn validate_cart_lines(lines: &[CartLine]) -> ValidationResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Empty {
            field: "lines".to_string(),
        });
    }

    if lines.len() > MAX_CART_LINES {
        return Err(ValidationError::out_of_range("lines", 1, MAX_CART_LINES as i64));
    }

    for line in lines {
        if line.product_id <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "product_id".to_string(),
            });
        }
        validate_quantity(line.quantity)?;
    }

    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates an idempotency key.
///
/// ## Rules
/// - 1 to MAX_IDEMPOTENCY_KEY_LEN characters
/// - Visible ASCII only (UUIDs, ULIDs and `till-3:000123` style keys pass)
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_idempotency_key;
///
/// assert!(validate_idempotency_key("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_idempotency_key("").is_err());
/// assert!(validate_idempotency_key("has space").is_err());
/// ```
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::Required {
            field: "idempotency_key".to_string(),
        });
    }

    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "idempotency_key".to_string(),
            max: MAX_IDEMPOTENCY_KEY_LEN,
        });
    }

    if !key.chars().all(|c| c.is_ascii_graphic()) {
        return Err(ValidationError::InvalidFormat {
            field: "idempotency_key".to_string(),
            reason: "must contain only visible ASCII characters".to_string(),
        });
    }

    Ok(())
}

/// Validates optional sale notes.
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<()> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LEN => Err(ValidationError::TooLong {
            field: "notes".to_string(),
            max: MAX_NOTES_LEN,
        }),
        _ => Ok(()),
    }
}

/// Validates a refund reason and returns it trimmed.
pub fn validate_reason(reason: &str) -> ValidationResult<String> {
    let reason = reason.trim();

    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }

    if reason.chars().count() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }

    Ok(reason.to_string())
}

// =============================================================================
// Unit Tests
// =============================================================================
