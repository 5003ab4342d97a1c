//! # Checkout Service
//!
//! Commits sales and refunds them. Each operation is one SQLite write
//! transaction; nothing it does is visible until the whole of it commits.
//!
//! ## Commit Stages
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Received ──► Validated ──► Deduplicated ──► StockReserved             │
//! │     │            │               │                 │                    │
//! │     │            │               │                 ▼                    │
//! │     │            │               │            Persisted ──► LoyaltyApplied
//! │     │            │               │                                │     │
//! │     ▼            ▼               ▼                                ▼     │
//! │  Rejected ◄──────┴───────────────┘                          Committed  │
//! │                                                                         │
//! │  Received → Validated       capability, branch scope, cart shape        │
//! │  Validated → Deduplicated   idempotency key (replay ends here)          │
//! │  → StockReserved            price snapshot, totals, conditional UPDATE  │
//! │  → Persisted                sale number, sale row, item rows            │
//! │  → LoyaltyApplied           points + lifetime purchases                 │
//! │  → Committed                receipt stored under the key, COMMIT        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything from `Deduplicated` on happens inside one transaction. A
//! failure at any later stage drops the transaction, which rolls back the
//! stock decrement and its OUT movements with it.
//!
//! ## Detached Commits
//! The transaction runs in a spawned task. The caller waits at most
//! `commit_timeout`; if that runs out the task keeps going and the caller
//! is told either the committed receipt (if the key already landed) or
//! `CommitPending`.
//!
//! ## Lock Contention
//! `SQLITE_BUSY` after the pool's busy timeout restarts the whole
//! transaction with exponential backoff, up to `max_attempts` in total.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CheckoutError, CheckoutResult};
use crate::retry::retry_busy;
use crate::settings::CheckoutSettings;
use tally_core::loyalty::{points_earned, reverse_points};
use tally_core::totals::{calculate_totals, PricedLine};
use tally_core::validation::{
    validate_cart_lines, validate_idempotency_key, validate_notes, validate_reason,
};
use tally_core::{
    Caller, Capability, CartLine, CoreError, DiscountRate, LoyaltyTransaction,
    LoyaltyTransactionType, PaymentMethod, PaymentStatus, Sale, SaleDetails, SaleItem,
    SaleReceipt, ValidationError,
};
use tally_db::{
    CatalogRepository, CustomerRepository, Database, IdempotencyCheck, IdempotencyRepository,
    SaleNumberRepository, SaleRepository, StockLedger, StockLine,
};

// =============================================================================
// Requests and Outcomes
// =============================================================================

/// A cart submission. Prices are never taken from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CommitSaleRequest {
    pub idempotency_key: String,
    pub branch_id: i64,
    #[serde(default)]
    pub customer_id: Option<i64>,
    pub payment_method: PaymentMethod,
    /// Whole-sale discount, 0 to 100.
    #[serde(default)]
    pub discount_percent: f64,
    pub lines: Vec<CartLine>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Result of [`CheckoutService::commit_sale`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOutcome {
    pub receipt: SaleReceipt,
    /// True when the key had already committed and nothing new was written.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub reason: String,
}

// =============================================================================
// Stages
// =============================================================================

/// Furthest point a commit reached. Logged with every rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    Received,
    Validated,
    Deduplicated,
    StockReserved,
    Persisted,
    LoyaltyApplied,
    Committed,
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitStage::Received => "received",
            CommitStage::Validated => "validated",
            CommitStage::Deduplicated => "deduplicated",
            CommitStage::StockReserved => "stock_reserved",
            CommitStage::Persisted => "persisted",
            CommitStage::LoyaltyApplied => "loyalty_applied",
            CommitStage::Committed => "committed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundStage {
    Requested,
    Located,
    StockRestored,
    LoyaltyReversed,
    Refunded,
}

impl fmt::Display for RefundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefundStage::Requested => "requested",
            RefundStage::Located => "located",
            RefundStage::StockRestored => "stock_restored",
            RefundStage::LoyaltyReversed => "loyalty_reversed",
            RefundStage::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Service
// =============================================================================

/// Sale commit and refund coordinator.
#[derive(Debug, Clone)]
pub struct CheckoutService {
    db: Database,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(db: Database, settings: CheckoutSettings) -> Self {
        CheckoutService { db, settings }
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    /// Commits a cart as a sale.
    ///
    /// A key that already committed returns its original receipt with
    /// `replayed = true` and writes nothing.
    pub async fn commit_sale(
        &self,
        caller: &Caller,
        request: CommitSaleRequest,
    ) -> CheckoutResult<CommitOutcome> {
        let discount = match validate_commit(caller, &request) {
            Ok(discount) => discount,
            Err(e) => {
                warn!(
                    stage = %CommitStage::Received,
                    branch_id = request.branch_id,
                    error = %e,
                    "Sale rejected"
                );
                return Err(e);
            }
        };

        let key = request.idempotency_key.clone();
        let fingerprint = request_fingerprint(&request, discount);
        let task_fingerprint = fingerprint.clone();
        let service = self.clone();
        let caller = *caller;
        let handle = tokio::spawn(async move {
            let (service, caller, request) = (&service, &caller, &request);
            let fingerprint = task_fingerprint.as_str();
            retry_busy(&service.settings, "commit_sale", move || {
                service.commit_attempt(caller, request, fingerprint, discount)
            })
            .await
        });

        match tokio::time::timeout(self.settings.commit_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CheckoutError::Internal(format!("commit task failed: {e}"))),
            Err(_) => {
                warn!(idempotency_key = %key, "Commit timed out, checking for a committed result");
                self.replay_after_timeout(&key, &fingerprint).await
            }
        }
    }

    /// Refunds a completed sale: stock back in, loyalty reversed, status
    /// flipped. A second refund is rejected without touching anything.
    pub async fn refund_sale(
        &self,
        caller: &Caller,
        sale_id: &str,
        request: RefundRequest,
    ) -> CheckoutResult<Sale> {
        caller.require(Capability::RefundSale)?;
        let reason = validate_reason(&request.reason)?;

        let service = self.clone();
        let caller = *caller;
        let sale_id = sale_id.to_string();
        // Runs to completion even if the request is dropped
        tokio::spawn(async move {
            let (service, caller, sale_id, reason) = (&service, &caller, &sale_id, &reason);
            retry_busy(&service.settings, "refund_sale", move || {
                service.refund_attempt(caller, sale_id, reason)
            })
            .await
        })
        .await
        .map_err(|e| CheckoutError::Internal(format!("refund task failed: {e}")))?
    }

    /// Sale header and items.
    pub async fn get_sale(&self, caller: &Caller, sale_id: &str) -> CheckoutResult<SaleDetails> {
        caller.require(Capability::ViewSales)?;

        let details = self
            .db
            .sales()
            .get_details(sale_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Sale", sale_id))?;

        caller.require_branch(details.sale.branch_id)?;
        Ok(details)
    }

    // =========================================================================
    // Timeout
    // =========================================================================

    async fn replay_after_timeout(
        &self,
        key: &str,
        fingerprint: &str,
    ) -> CheckoutResult<CommitOutcome> {
        match self.db.idempotency().lookup(key).await? {
            Some(record) if !record.matches(fingerprint) => Err(key_reused()),
            Some(record) => {
                let receipt: SaleReceipt = record.response()?;
                info!(idempotency_key = %key, sale_id = %receipt.sale_id, "Commit landed after timeout");
                Ok(CommitOutcome {
                    receipt,
                    replayed: true,
                })
            }
            None => Err(CheckoutError::CommitPending {
                key: key.to_string(),
            }),
        }
    }

    // =========================================================================
    // Commit
    // =========================================================================

    async fn commit_attempt(
        &self,
        caller: &Caller,
        request: &CommitSaleRequest,
        fingerprint: &str,
        discount: DiscountRate,
    ) -> CheckoutResult<CommitOutcome> {
        let mut stage = CommitStage::Validated;
        let result = self
            .commit_in_tx(caller, request, fingerprint, discount, &mut stage)
            .await;

        if let Err(e) = &result {
            if !e.is_transient() {
                warn!(
                    stage = %stage,
                    branch_id = request.branch_id,
                    idempotency_key = %request.idempotency_key,
                    error = %e,
                    "Sale rejected"
                );
            }
        }
        result
    }

    async fn commit_in_tx(
        &self,
        caller: &Caller,
        request: &CommitSaleRequest,
        fingerprint: &str,
        discount: DiscountRate,
        stage: &mut CommitStage,
    ) -> CheckoutResult<CommitOutcome> {
        let now = Utc::now();
        let branch_id = request.branch_id;
        let mut tx = self.db.begin().await?;

        // The expired-key DELETE inside check_in takes the write lock first
        let check = IdempotencyRepository::check_in(&mut tx, &request.idempotency_key, now).await?;
        if let IdempotencyCheck::AlreadyHandled(record) = check {
            if !record.matches(fingerprint) {
                return Err(key_reused());
            }
            tx.commit().await?;
            let receipt: SaleReceipt = record.response()?;
            info!(
                sale_id = %receipt.sale_id,
                sale_number = %receipt.sale_number,
                idempotency_key = %request.idempotency_key,
                "Replaying committed sale"
            );
            return Ok(CommitOutcome {
                receipt,
                replayed: true,
            });
        }
        *stage = CommitStage::Deduplicated;

        CatalogRepository::branch_in(&mut tx, branch_id)
            .await?
            .ok_or(CoreError::BranchNotFound(branch_id))?;

        let ids: Vec<i64> = request.lines.iter().map(|l| l.product_id).collect();
        let products = CatalogRepository::products_in(&mut tx, &ids).await?;

        let mut priced = Vec::with_capacity(request.lines.len());
        let mut names = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let product = products
                .get(&line.product_id)
                .filter(|p| p.is_active)
                .ok_or(CoreError::ProductNotFound(line.product_id))?;
            priced.push(PricedLine {
                product_id: product.id,
                quantity: line.quantity,
                unit_price_cents: product.selling_price_cents,
                tax_rate: product.tax_rate(),
            });
            names.push(product.name.clone());
        }

        let totals = calculate_totals(&priced, discount)?;

        let customer = match request.customer_id {
            Some(id) => Some(
                CustomerRepository::get_by_id_in(&mut tx, id)
                    .await?
                    .ok_or(CoreError::CustomerNotFound(id))?,
            ),
            None => None,
        };
        let points = match customer {
            Some(_) => points_earned(totals.total(), self.settings.loyalty_rate),
            None => 0,
        };

        let sale_id = Uuid::new_v4().to_string();
        let item_ids: Vec<String> = totals.lines.iter().map(|_| Uuid::new_v4().to_string()).collect();

        let stock_lines: Vec<StockLine> = totals
            .lines
            .iter()
            .zip(&item_ids)
            .map(|(line, item_id)| StockLine {
                product_id: line.product_id,
                quantity: line.quantity,
                sale_item_id: Some(item_id.clone()),
            })
            .collect();

        StockLedger::reserve_and_decrement_in(
            &mut tx,
            branch_id,
            &stock_lines,
            &format!("SALE-{sale_id}"),
            caller.user_id,
            now,
        )
        .await?;
        *stage = CommitStage::StockReserved;

        let sale_number = SaleNumberRepository::issue_in(&mut tx, branch_id).await?;

        let sale = Sale {
            id: sale_id.clone(),
            sale_number: sale_number.clone(),
            branch_id,
            customer_id: request.customer_id,
            cashier_id: caller.user_id,
            subtotal_cents: totals.subtotal_cents,
            tax_cents: totals.tax_cents,
            discount_cents: totals.discount_cents,
            discount_bps: discount.bps(),
            total_cents: totals.total_cents,
            points_earned: points,
            payment_method: request.payment_method,
            payment_status: PaymentStatus::Completed,
            notes: request.notes.clone(),
            refund_reason: None,
            created_at: now,
            refunded_at: None,
        };

        let items: Vec<SaleItem> = totals
            .lines
            .iter()
            .zip(item_ids)
            .zip(names)
            .enumerate()
            .map(|(i, ((line, id), product_name))| SaleItem {
                id,
                sale_id: sale_id.clone(),
                product_id: line.product_id,
                product_name,
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                tax_rate_bps: line.tax_rate_bps,
                line_total_cents: line.line_total_cents,
                tax_cents: line.tax_cents,
                discount_cents: line.discount_cents,
                line_no: i as i64 + 1,
            })
            .collect();

        SaleRepository::insert_sale_in(&mut tx, &sale).await?;
        SaleRepository::insert_items_in(&mut tx, &items).await?;
        *stage = CommitStage::Persisted;

        if let Some(customer) = &customer {
            CustomerRepository::apply_purchase_in(&mut tx, customer.id, totals.total_cents, points)
                .await?;
            if points > 0 {
                CustomerRepository::insert_loyalty_tx_in(
                    &mut tx,
                    &LoyaltyTransaction {
                        id: Uuid::new_v4().to_string(),
                        customer_id: customer.id,
                        sale_id: Some(sale_id.clone()),
                        transaction_type: LoyaltyTransactionType::Earned,
                        points,
                        description: Some(format!("Earned on sale {sale_number}")),
                        created_at: now,
                    },
                )
                .await?;
            }
        }
        *stage = CommitStage::LoyaltyApplied;

        let receipt = receipt_for(&sale);
        IdempotencyRepository::record_in(
            &mut tx,
            &request.idempotency_key,
            &sale_id,
            fingerprint,
            &receipt,
            now,
            self.settings.idempotency_ttl_chrono(),
        )
        .await?;

        tx.commit().await?;
        *stage = CommitStage::Committed;

        info!(
            sale_id = %sale_id,
            sale_number = %sale_number,
            branch_id,
            total_cents = totals.total_cents,
            items = items.len(),
            points_earned = points,
            "Sale committed"
        );

        Ok(CommitOutcome {
            receipt,
            replayed: false,
        })
    }

    // =========================================================================
    // Refund
    // =========================================================================

    async fn refund_attempt(&self, caller: &Caller, sale_id: &str, reason: &str) -> CheckoutResult<Sale> {
        let mut stage = RefundStage::Requested;
        let result = self.refund_in_tx(caller, sale_id, reason, &mut stage).await;

        if let Err(e) = &result {
            if !e.is_transient() {
                warn!(stage = %stage, sale_id, error = %e, "Refund rejected");
            }
        }
        result
    }

    async fn refund_in_tx(
        &self,
        caller: &Caller,
        sale_id: &str,
        reason: &str,
        stage: &mut RefundStage,
    ) -> CheckoutResult<Sale> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        // Conditional status flip first: it takes the write lock and loses
        // cleanly to a concurrent refund
        let sale = match SaleRepository::mark_refunded_in(&mut tx, sale_id, reason, now).await {
            Ok(sale) => sale,
            Err(e) => {
                // Scope outranks the sale's state
                if let Some(existing) = SaleRepository::get_by_id_in(&mut tx, sale_id).await? {
                    caller.require_branch(existing.branch_id)?;
                }
                return Err(e.into());
            }
        };
        caller.require_branch(sale.branch_id)?;
        *stage = RefundStage::Located;

        let items = SaleRepository::get_items_in(&mut tx, sale_id).await?;
        let lines: Vec<StockLine> = items
            .iter()
            .map(|item| StockLine {
                product_id: item.product_id,
                quantity: item.quantity,
                sale_item_id: Some(item.id.clone()),
            })
            .collect();

        StockLedger::restore_in(
            &mut tx,
            sale.branch_id,
            &lines,
            &format!("REFUND-{}", sale.sale_number),
            caller.user_id,
            now,
        )
        .await?;
        *stage = RefundStage::StockRestored;

        if let Some(customer_id) = sale.customer_id {
            let customer = CustomerRepository::get_by_id_in(&mut tx, customer_id)
                .await?
                .ok_or(CoreError::CustomerNotFound(customer_id))?;

            let reversal = reverse_points(sale.points_earned, customer.loyalty_points);
            if reversal.is_clamped() {
                warn!(
                    sale_id,
                    customer_id,
                    points_earned = sale.points_earned,
                    balance = customer.loyalty_points,
                    shortfall = reversal.shortfall,
                    "Loyalty discrepancy: balance too low to reverse all points"
                );
            }

            CustomerRepository::reverse_purchase_in(
                &mut tx,
                customer_id,
                sale.total_cents,
                reversal.deducted,
            )
            .await?;

            if sale.points_earned > 0 {
                let description = if reversal.is_clamped() {
                    format!(
                        "Refund of sale {}; {} points could not be reversed",
                        sale.sale_number, reversal.shortfall
                    )
                } else {
                    format!("Refund of sale {}", sale.sale_number)
                };
                CustomerRepository::insert_loyalty_tx_in(
                    &mut tx,
                    &LoyaltyTransaction {
                        id: Uuid::new_v4().to_string(),
                        customer_id,
                        sale_id: Some(sale.id.clone()),
                        transaction_type: LoyaltyTransactionType::Adjusted,
                        points: -reversal.deducted,
                        description: Some(description),
                        created_at: now,
                    },
                )
                .await?;
            }
        }
        *stage = RefundStage::LoyaltyReversed;

        tx.commit().await?;
        *stage = RefundStage::Refunded;

        info!(
            sale_id,
            sale_number = %sale.sale_number,
            branch_id = sale.branch_id,
            items = items.len(),
            "Sale refunded"
        );

        Ok(sale)
    }
}

/// Capability, branch scope and cart shape. Returns the parsed discount.
fn validate_commit(caller: &Caller, request: &CommitSaleRequest) -> CheckoutResult<DiscountRate> {
    caller.require_at(Capability::CommitSale, request.branch_id)?;
    validate_idempotency_key(&request.idempotency_key)?;
    validate_cart_lines(&request.lines)?;
    validate_notes(request.notes.as_deref())?;
    Ok(DiscountRate::from_percentage(request.discount_percent)?)
}

/// Canonical form of what a request commits. A key replays only for a
/// request with the same fingerprint.
fn request_fingerprint(request: &CommitSaleRequest, discount: DiscountRate) -> String {
    let lines: Vec<String> = request
        .lines
        .iter()
        .map(|line| format!("{}x{}", line.product_id, line.quantity))
        .collect();
    let customer = request
        .customer_id
        .map_or_else(|| "-".to_string(), |id| id.to_string());

    format!(
        "branch={};customer={};payment={:?};discount_bps={};lines={}",
        request.branch_id,
        customer,
        request.payment_method,
        discount.bps(),
        lines.join(",")
    )
}

fn key_reused() -> CheckoutError {
    ValidationError::InvalidFormat {
        field: "idempotency_key".to_string(),
        reason: "already used for a different sale".to_string(),
    }
    .into()
}

fn receipt_for(sale: &Sale) -> SaleReceipt {
    SaleReceipt {
        sale_id: sale.id.clone(),
        sale_number: sale.sale_number.clone(),
        branch_id: sale.branch_id,
        customer_id: sale.customer_id,
        subtotal_cents: sale.subtotal_cents,
        tax_cents: sale.tax_cents,
        discount_cents: sale.discount_cents,
        total_cents: sale.total_cents,
        points_earned: sale.points_earned,
        payment_method: sale.payment_method,
        created_at: sale.created_at,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin, cashier, seed, seeded_db};
    use tally_core::{Customer, MovementType, Role};
    use tally_db::DbConfig;

    fn request(key: &str, lines: &[(i64, i64)], customer_id: Option<i64>, discount: f64) -> CommitSaleRequest {
        CommitSaleRequest {
            idempotency_key: key.to_string(),
            branch_id: 1,
            customer_id,
            payment_method: PaymentMethod::Card,
            discount_percent: discount,
            lines: lines
                .iter()
                .map(|&(product_id, quantity)| CartLine { product_id, quantity })
                .collect(),
            notes: None,
        }
    }

    async fn setup() -> (Database, CheckoutService) {
        let db = seeded_db().await;
        let checkout = CheckoutService::new(db.clone(), CheckoutSettings::default());
        (db, checkout)
    }

    async fn available(db: &Database, product_id: i64, branch_id: i64) -> i64 {
        db.inventory()
            .stock_level(product_id, branch_id)
            .await
            .unwrap()
            .map(|level| level.available_stock())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_commit_worked_example() {
        let (db, checkout) = setup().await;

        let outcome = checkout
            .commit_sale(&cashier(1), request("k-1", &[(7, 3)], Some(42), 10.0))
            .await
            .unwrap();
        let receipt = outcome.receipt;

        assert!(!outcome.replayed);
        assert_eq!(receipt.sale_number, "MAIN-000001");
        assert_eq!(receipt.subtotal_cents, 3000);
        assert_eq!(receipt.tax_cents, 300);
        assert_eq!(receipt.discount_cents, 300);
        assert_eq!(receipt.total_cents, 3000);
        assert_eq!(receipt.points_earned, 30);

        assert_eq!(available(&db, 7, 1).await, 7);

        let movements = db
            .inventory()
            .movements_by_reference(&format!("SALE-{}", receipt.sale_id))
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].movement_type, MovementType::Out);
        assert_eq!(movements[0].quantity, -3);
        assert!(movements[0].sale_item_id.is_some());

        let ada = db.customers().get_by_id(42).await.unwrap().unwrap();
        assert_eq!(ada.loyalty_points, 30);
        assert_eq!(ada.total_purchases_cents, 3000);

        let history = db.customers().loyalty_history(42, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].transaction_type, LoyaltyTransactionType::Earned);
        assert_eq!(history[0].points, 30);
    }

    #[tokio::test]
    async fn test_line_figures_add_up_to_header() {
        let (db, checkout) = setup().await;

        let receipt = checkout
            .commit_sale(&admin(), request("k-sum", &[(7, 1), (8, 3), (7, 2)], None, 12.5))
            .await
            .unwrap()
            .receipt;

        let details = checkout.get_sale(&admin(), &receipt.sale_id).await.unwrap();
        let items = &details.items;
        assert_eq!(items.len(), 3);
        assert_eq!(
            items.iter().map(|i| i.line_no).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let lines: i64 = items.iter().map(|i| i.line_total_cents).sum();
        let tax: i64 = items.iter().map(|i| i.tax_cents).sum();
        let discount: i64 = items.iter().map(|i| i.discount_cents).sum();
        assert_eq!(lines, details.sale.subtotal_cents);
        assert_eq!(tax, details.sale.tax_cents);
        assert_eq!(discount, details.sale.discount_cents);
        assert_eq!(lines + tax - discount, details.sale.total_cents);

        assert_eq!(available(&db, 7, 1).await, 7);
        assert_eq!(available(&db, 8, 1).await, 0);
    }

    #[tokio::test]
    async fn test_resubmitted_key_replays_without_writes() {
        let (db, checkout) = setup().await;
        let first = checkout
            .commit_sale(&cashier(1), request("k-dup", &[(7, 2)], Some(42), 0.0))
            .await
            .unwrap();

        let second = checkout
            .commit_sale(&cashier(1), request("k-dup", &[(7, 2)], Some(42), 0.0))
            .await
            .unwrap();

        assert!(second.replayed);
        assert_eq!(second.receipt, first.receipt);
        assert_eq!(available(&db, 7, 1).await, 8);
        assert_eq!(db.sale_numbers().last_issued(1).await.unwrap(), 1);
        // 2 x 10.00 plus 10% tax
        assert_eq!(db.customers().get_by_id(42).await.unwrap().unwrap().loyalty_points, 22);
    }

    #[tokio::test]
    async fn test_reused_key_with_different_request_is_rejected() {
        let (db, checkout) = setup().await;
        let first = checkout
            .commit_sale(&cashier(1), request("shared-key", &[(7, 2)], None, 0.0))
            .await
            .unwrap();

        // Same key from another branch with its own cart
        let mut elsewhere = request("shared-key", &[(8, 1)], None, 0.0);
        elsewhere.branch_id = 2;
        let err = checkout.commit_sale(&cashier(2), elsewhere).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::Validation(ValidationError::InvalidFormat { ref field, .. }) if field == "idempotency_key"
        ));

        // Same branch, different cart
        let err = checkout
            .commit_sale(&cashier(1), request("shared-key", &[(7, 3)], None, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        assert_eq!(available(&db, 7, 1).await, 8);
        assert_eq!(available(&db, 8, 2).await, 3);
        assert_eq!(db.sale_numbers().last_issued(2).await.unwrap(), 0);

        let replay = checkout
            .commit_sale(&cashier(1), request("shared-key", &[(7, 2)], None, 0.0))
            .await
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.receipt, first.receipt);
    }

    #[tokio::test]
    async fn test_failure_after_stock_reserved_rolls_back() {
        let (db, checkout) = setup().await;
        sqlx::query(
            r#"
            CREATE TRIGGER reject_sales BEFORE INSERT ON sales
            BEGIN
                SELECT RAISE(ABORT, 'sales table is read-only');
            END
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        let err = checkout
            .commit_sale(&cashier(1), request("k-abort", &[(7, 3)], Some(42), 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::System(_)));

        assert_eq!(available(&db, 7, 1).await, 10);
        let movements = db.inventory().movements_for(7, 1, 10).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].reference, "OPENING");
        assert_eq!(db.sale_numbers().last_issued(1).await.unwrap(), 0);
        assert!(db.idempotency().lookup("k-abort").await.unwrap().is_none());

        let ada = db.customers().get_by_id(42).await.unwrap().unwrap();
        assert_eq!(ada.loyalty_points, 0);
        assert_eq!(ada.total_purchases_cents, 0);
    }

    #[tokio::test]
    async fn test_insufficient_stock_persists_nothing() {
        let (db, checkout) = setup().await;

        let err = checkout
            .commit_sale(&admin(), request("k-short", &[(7, 4), (8, 4)], Some(42), 0.0))
            .await
            .unwrap_err();

        match err {
            CheckoutError::InsufficientStock {
                product_id,
                available,
                requested,
                ..
            } => {
                assert_eq!(product_id, 8);
                assert_eq!(available, 3);
                assert_eq!(requested, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(available(&db, 7, 1).await, 10);
        assert_eq!(db.sale_numbers().last_issued(1).await.unwrap(), 0);
        assert!(db.idempotency().lookup("k-short").await.unwrap().is_none());
        assert_eq!(db.customers().get_by_id(42).await.unwrap().unwrap().total_purchases_cents, 0);
    }

    #[tokio::test]
    async fn test_rejections_before_the_transaction() {
        let (_db, checkout) = setup().await;

        let err = checkout
            .commit_sale(&admin(), request("k-empty", &[], None, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let err = checkout
            .commit_sale(&admin(), request("k-disc", &[(7, 1)], None, 150.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let err = checkout
            .commit_sale(&cashier(2), request("k-scope", &[(7, 1)], None, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Forbidden(_)));

        let manager = Caller::new(5, Role::InventoryManager, None);
        let err = checkout
            .commit_sale(&manager, request("k-role", &[(7, 1)], None, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_unknown_references_are_not_found() {
        let (db, checkout) = setup().await;

        let err = checkout
            .commit_sale(&admin(), request("k-p", &[(404, 1)], None, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { ref entity, .. } if entity == "Product"));

        let err = checkout
            .commit_sale(&admin(), request("k-c", &[(7, 1)], Some(404), 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { ref entity, .. } if entity == "Customer"));

        let mut retired = db.catalog().get_product(8).await.unwrap().unwrap();
        retired.is_active = false;
        db.catalog().upsert_product(&retired).await.unwrap();
        let err = checkout
            .commit_sale(&admin(), request("k-r", &[(8, 1)], None, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { .. }));

        assert_eq!(available(&db, 7, 1).await, 10);
    }

    #[tokio::test]
    async fn test_refund_restores_stock_and_loyalty() {
        let (db, checkout) = setup().await;
        let receipt = checkout
            .commit_sale(&cashier(1), request("k-ref", &[(7, 3)], Some(42), 10.0))
            .await
            .unwrap()
            .receipt;

        let sale = checkout
            .refund_sale(
                &cashier(1),
                &receipt.sale_id,
                RefundRequest {
                    reason: "  damaged box ".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(sale.payment_status, PaymentStatus::Refunded);
        assert_eq!(sale.refund_reason.as_deref(), Some("damaged box"));
        assert!(sale.refunded_at.is_some());
        assert_eq!(available(&db, 7, 1).await, 10);

        let restored = db
            .inventory()
            .movements_by_reference(&format!("REFUND-{}", receipt.sale_number))
            .await
            .unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].movement_type, MovementType::In);
        assert_eq!(restored[0].quantity, 3);

        let ada = db.customers().get_by_id(42).await.unwrap().unwrap();
        assert_eq!(ada.loyalty_points, 0);
        assert_eq!(ada.total_purchases_cents, 0);

        let history = db.customers().loyalty_history(42, 10).await.unwrap();
        assert_eq!(history[0].transaction_type, LoyaltyTransactionType::Adjusted);
        assert_eq!(history[0].points, -30);
    }

    #[tokio::test]
    async fn test_second_refund_is_rejected_without_mutation() {
        let (db, checkout) = setup().await;
        let receipt = checkout
            .commit_sale(&admin(), request("k-twice", &[(7, 2)], None, 0.0))
            .await
            .unwrap()
            .receipt;
        let refund = || RefundRequest {
            reason: "wrong item".into(),
        };

        checkout.refund_sale(&admin(), &receipt.sale_id, refund()).await.unwrap();
        let err = checkout
            .refund_sale(&admin(), &receipt.sale_id, refund())
            .await
            .unwrap_err();

        assert!(matches!(err, CheckoutError::AlreadyRefunded { ref sale_number } if *sale_number == receipt.sale_number));
        assert_eq!(available(&db, 7, 1).await, 10);
    }

    #[tokio::test]
    async fn test_refunded_sale_elsewhere_is_forbidden() {
        let (_db, checkout) = setup().await;
        let receipt = checkout
            .commit_sale(&cashier(1), request("k-done", &[(7, 1)], None, 0.0))
            .await
            .unwrap()
            .receipt;
        checkout
            .refund_sale(&cashier(1), &receipt.sale_id, RefundRequest { reason: "returned".into() })
            .await
            .unwrap();

        let err = checkout
            .refund_sale(&cashier(2), &receipt.sale_id, RefundRequest { reason: "again".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_refund_clamps_spent_points() {
        let (db, checkout) = setup().await;
        let receipt = checkout
            .commit_sale(&admin(), request("k-spent", &[(7, 3)], Some(42), 10.0))
            .await
            .unwrap()
            .receipt;

        // Customer redeemed most of the points elsewhere
        db.customers()
            .upsert_customer(&Customer {
                id: 42,
                name: "Ada".into(),
                loyalty_points: 12,
                total_purchases_cents: 3000,
            })
            .await
            .unwrap();

        checkout
            .refund_sale(
                &admin(),
                &receipt.sale_id,
                RefundRequest {
                    reason: "returned".into(),
                },
            )
            .await
            .unwrap();

        let ada = db.customers().get_by_id(42).await.unwrap().unwrap();
        assert_eq!(ada.loyalty_points, 0);

        let history = db.customers().loyalty_history(42, 10).await.unwrap();
        assert_eq!(history[0].points, -12);
        assert!(history[0].description.as_deref().unwrap_or("").contains("18 points"));
    }

    #[tokio::test]
    async fn test_refund_rejections() {
        let (_db, checkout) = setup().await;

        let err = checkout
            .refund_sale(&admin(), "no-such-sale", RefundRequest { reason: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { .. }));

        let err = checkout
            .refund_sale(&admin(), "no-such-sale", RefundRequest { reason: "   ".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let receipt = checkout
            .commit_sale(&admin(), request("k-other", &[(7, 1)], None, 0.0))
            .await
            .unwrap()
            .receipt;
        let err = checkout
            .refund_sale(&cashier(2), &receipt.sale_id, RefundRequest { reason: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Forbidden(_)));

        // Out-of-scope attempt rolled back
        let sale = checkout.get_sale(&admin(), &receipt.sale_id).await.unwrap().sale;
        assert_eq!(sale.payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_get_sale_scope() {
        let (_db, checkout) = setup().await;
        let receipt = checkout
            .commit_sale(&admin(), request("k-view", &[(7, 1)], None, 0.0))
            .await
            .unwrap()
            .receipt;

        let details = checkout.get_sale(&cashier(1), &receipt.sale_id).await.unwrap();
        assert_eq!(details.sale.sale_number, receipt.sale_number);
        assert_eq!(details.items[0].product_name, "Widget");

        let err = checkout.get_sale(&cashier(2), &receipt.sale_id).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Forbidden(_)));

        let err = checkout.get_sale(&admin(), "missing").await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeout_lookup() {
        let (_db, checkout) = setup().await;

        let late = request("k-late", &[(7, 1)], None, 0.0);
        let fingerprint = request_fingerprint(&late, DiscountRate::none());

        let err = checkout
            .replay_after_timeout("k-never", &fingerprint)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::CommitPending { .. }));

        let committed = checkout.commit_sale(&admin(), late).await.unwrap();
        let replay = checkout
            .replay_after_timeout("k-late", &fingerprint)
            .await
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.receipt, committed.receipt);

        let other = request("k-late", &[(7, 2)], None, 0.0);
        let err = checkout
            .replay_after_timeout("k-late", &request_fingerprint(&other, DiscountRate::none()))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_never_oversell() {
        let path = std::env::temp_dir().join(format!("tally-race-{}.db", Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(4)).await.unwrap();
        let db = seed(db).await;
        let checkout = CheckoutService::new(db.clone(), CheckoutSettings::default());

        // 10 Widgets on hand, each cart wants 6
        let who = admin();
        let (a, b) = tokio::join!(
            checkout.commit_sale(&who, request("race-a", &[(7, 6)], None, 0.0)),
            checkout.commit_sale(&who, request("race-b", &[(7, 6)], None, 0.0)),
        );

        let outcomes = [a, b];
        let won = outcomes.iter().filter(|r| r.is_ok()).count();
        let lost = outcomes
            .iter()
            .filter(|r| matches!(r, Err(CheckoutError::InsufficientStock { .. })))
            .count();
        assert_eq!((won, lost), (1, 1));
        assert_eq!(available(&db, 7, 1).await, 4);
        assert_eq!(db.sale_numbers().last_issued(1).await.unwrap(), 1);

        db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
