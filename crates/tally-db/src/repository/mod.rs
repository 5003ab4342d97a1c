//! # Repository Module
//!
//! Database repository implementations for Tally.
//!
//! ## Two Calling Styles
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Standalone (owns its transaction)                                     │
//! │       db.inventory().receive(7, 1, 24, ...)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StockLedger ── pool.begin() ── receive_in(&mut tx) ── commit          │
//! │                                                                         │
//! │  Joined (caller owns the transaction)                                  │
//! │       let mut tx = db.begin().await?;                                  │
//! │       StockLedger::reserve_and_decrement_in(&mut tx, ...)              │
//! │       SaleRepository::insert_sale_in(&mut tx, ...)                     │
//! │       CustomerRepository::apply_purchase_in(&mut tx, ...)              │
//! │       tx.commit()                                                      │
//! │                                                                         │
//! │  Every `*_in` function takes `&mut SqliteConnection`, so a sale's      │
//! │  writes land together or not at all.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`catalog::CatalogRepository`] - Branch and product lookups
//! - [`inventory::StockLedger`] - Stock levels and movements
//! - [`sale_number::SaleNumberRepository`] - Per-branch sale numbers
//! - [`idempotency::IdempotencyRepository`] - Replay records for commits
//! - [`sale::SaleRepository`] - Sales and sale items
//! - [`customer::CustomerRepository`] - Loyalty balances and ledger

pub mod catalog;
pub mod customer;
pub mod idempotency;
pub mod inventory;
pub mod sale;
pub mod sale_number;
