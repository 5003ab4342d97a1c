//! # tally-core: Pure Business Logic for Tally
//!
//! Everything in the sale commit engine that can be computed without touching
//! storage lives here: money, cart totals, loyalty points, role capabilities,
//! and request validation.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Tally Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/server (axum HTTP)                         │   │
//! │  │   POST /api/sales ── POST /api/sales/{id}/refund ── ...         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              tally-checkout (commit coordinator)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌──────────┐ │   │
//! │  │   │  money  │ │ totals  │ │ loyalty │ │ access  │ │validation│ │   │
//! │  │   └─────────┘ └─────────┘ └─────────┘ └─────────┘ └──────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-db (SQLite)                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, SaleItem, StockMovement, ...)
//! - [`money`] - Integer money and round-half-to-even helpers
//! - [`totals`] - Cart totals calculator
//! - [`loyalty`] - Loyalty point accrual and reversal
//! - [`access`] - Roles, capabilities and caller scope
//! - [`error`] - Domain error types
//! - [`validation`] - Request validation
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::totals::{calculate_totals, PricedLine};
//! use tally_core::types::{DiscountRate, TaxRate};
//!
//! let lines = [PricedLine {
//!     product_id: 7,
//!     quantity: 3,
//!     unit_price_cents: 1000,
//!     tax_rate: TaxRate::from_bps(1000),
//! }];
//!
//! let totals = calculate_totals(&lines, DiscountRate::from_bps(1000)).unwrap();
//! assert_eq!(totals.subtotal_cents, 3000);
//! assert_eq!(totals.tax_cents, 300);
//! assert_eq!(totals.discount_cents, 300);
//! assert_eq!(totals.total_cents, 3000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod access;
pub mod error;
pub mod loyalty;
pub mod money;
pub mod totals;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use access::{Caller, Capability, Role};
pub use error::{CoreError, CoreResult, ValidationError};
pub use loyalty::LoyaltyRate;
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum number of lines in a single cart.
pub const MAX_CART_LINES: usize = 200;

/// Maximum quantity on a single cart line.
///
/// ## Business Reason
/// Catches keying mistakes at the till (typing 10000 instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 9_999;

/// Maximum length of a caller-supplied idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Basis points in 100%.
pub const BPS_SCALE: u32 = 10_000;
