//! # tally-db: Database Layer for Tally
//!
//! Every SQL statement the sale-commit engine runs lives in this crate.
//! It uses SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tally Data Flow                                │
//! │                                                                         │
//! │  CheckoutService::commit_sale (tally-checkout)                         │
//! │       │  opens one transaction, passes &mut conn to each *_in call     │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐  ┌────────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │  │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │  │ (embedded) │  │   │
//! │  │   │               │    │ CatalogRepository  │  │            │  │   │
//! │  │   │ SqlitePool    │◄───│ StockLedger        │  │ 001_init   │  │   │
//! │  │   │ begin()       │    │ SaleNumberRepo     │  │            │  │   │
//! │  │   │               │    │ IdempotencyRepo    │  │            │  │   │
//! │  │   │               │    │ SaleRepository     │  │            │  │   │
//! │  │   │               │    │ CustomerRepository │  │            │  │   │
//! │  │   └───────────────┘    └────────────────────┘  └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          SQLite Database (WAL, foreign keys, busy_timeout)      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("tally.db")).await?;
//! let low = db.inventory().low_stock(Some(1)).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::catalog::CatalogRepository;
pub use repository::customer::CustomerRepository;
pub use repository::idempotency::{IdempotencyCheck, IdempotencyRecord, IdempotencyRepository};
pub use repository::inventory::{StockLedger, StockLine};
pub use repository::sale::SaleRepository;
pub use repository::sale_number::SaleNumberRepository;
