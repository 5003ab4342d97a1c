//! # tally-checkout: Sale Commit Coordinator
//!
//! Application services over the Tally storage layer. Every public
//! operation checks the caller first, then runs as one database
//! transaction, retried while SQLite reports the database busy.
//!
//! ## Services
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  CheckoutService    commit_sale, refund_sale, get_sale                  │
//! │  InventoryService   stock, low_stock, receive, adjust, transfer         │
//! │  LoyaltyService     customer_loyalty                                    │
//! │                                                                         │
//! │  All three share CheckoutSettings (timeouts, retry, loyalty rate)       │
//! │  and return CheckoutError.                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use tally_checkout::{CheckoutService, CheckoutSettings, CommitSaleRequest};
//! use tally_core::{CartLine, Caller, PaymentMethod, Role};
//! use tally_db::{Database, DbConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DbConfig::new("./tally.db")).await?;
//! let checkout = CheckoutService::new(db, CheckoutSettings::default());
//!
//! let cashier = Caller::new(9, Role::Cashier, Some(1));
//! let outcome = checkout
//!     .commit_sale(
//!         &cashier,
//!         CommitSaleRequest {
//!             idempotency_key: "till-3-000172".into(),
//!             branch_id: 1,
//!             customer_id: None,
//!             payment_method: PaymentMethod::Cash,
//!             discount_percent: 0.0,
//!             lines: vec![CartLine { product_id: 7, quantity: 3 }],
//!             notes: None,
//!         },
//!     )
//!     .await?;
//! println!("{}", outcome.receipt.sale_number);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod inventory;
pub mod loyalty;
mod retry;
pub mod service;
pub mod settings;

pub use error::{CheckoutError, CheckoutResult};
pub use inventory::{
    AdjustStockRequest, InventoryService, ReceiveStockRequest, StockReport, TransferOutcome,
    TransferStockRequest,
};
pub use loyalty::{CustomerLoyalty, LoyaltyService};
pub use service::{
    CheckoutService, CommitOutcome, CommitSaleRequest, CommitStage, RefundRequest, RefundStage,
};
pub use settings::CheckoutSettings;
