//! # Domain Types
//!
//! Core domain types shared by storage, the coordinator and the HTTP layer.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  External (read-only snapshots)      Owned by the engine                │
//! │  ───────────────────────────────     ─────────────────────────────      │
//! │  Branch         id, code             Sale         immutable except      │
//! │  CatalogProduct price, tax rate                   Completed → Refunded  │
//! │  Customer       points, purchases    SaleItem     price snapshot        │
//! │                                      StockMovement append-only          │
//! │  InventoryLevel (product, branch)    LoyaltyTransaction append-only     │
//! │    available = current − reserved    SaleReceipt  idempotent replay     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! - Catalog entities (product, branch, customer, user) use the integer ids
//!   of the surrounding storefront system.
//! - Everything the engine creates (sale, item, movement, loyalty entry) uses
//!   a UUID v4 string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::BPS_SCALE;

// =============================================================================
// Rates
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 825 bps = 8.25%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

/// Whole-sale discount in basis points, 0 to 10000 (0% to 100%).
///
/// ## Example
/// ```rust
/// use tally_core::types::DiscountRate;
///
/// let rate = DiscountRate::from_percentage(12.5).unwrap();
/// assert_eq!(rate.bps(), 1250);
/// assert!(DiscountRate::from_percentage(100.01).is_err());
/// assert!(DiscountRate::from_percentage(-1.0).is_err());
/// assert!(DiscountRate::from_percentage(12.345).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DiscountRate(u32);

impl DiscountRate {
    /// Creates a discount rate from basis points, clamped to 100%.
    #[inline]
    pub fn from_bps(bps: u32) -> Self {
        DiscountRate(bps.min(BPS_SCALE))
    }

    /// Converts a request percentage into basis points.
    ///
    /// Rejects NaN, negatives, anything above 100, and percentages with
    /// more than two decimal places. Those are never rounded to fit.
    pub fn from_percentage(pct: f64) -> Result<Self, ValidationError> {
        if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
            return Err(ValidationError::out_of_range("discount_percent", 0, 100));
        }
        let scaled = pct * 100.0;
        let bps = scaled.round();
        // Tolerance absorbs binary representation error only, e.g. 33.33
        if (scaled - bps).abs() > 1e-6 {
            return Err(ValidationError::InvalidFormat {
                field: "discount_percent".to_string(),
                reason: "must have at most two decimal places".to_string(),
            });
        }
        Ok(DiscountRate(bps as u32))
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn none() -> Self {
        DiscountRate(0)
    }
}

// =============================================================================
// Catalog Snapshots
// =============================================================================

/// A branch (store location). The code prefixes every sale number it issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: i64,
    pub code: String,
    pub name: String,
}

/// Product as the catalog knows it at the moment a cart is priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
    pub id: i64,
    pub name: String,
    pub selling_price_cents: i64,
    pub tax_rate_bps: u32,
    /// Stock at or below this level shows up in the low-stock report.
    pub reorder_level: i64,
    pub is_active: bool,
}

impl CatalogProduct {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.selling_price_cents)
    }

    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }
}

/// Customer loyalty standing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub loyalty_points: i64,
    pub total_purchases_cents: i64,
}

// =============================================================================
// Inventory
// =============================================================================

/// Stock for one product at one branch.
///
/// `available_stock` is derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLevel {
    pub product_id: i64,
    pub branch_id: i64,
    pub current_stock: i64,
    pub reserved_stock: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl InventoryLevel {
    /// Stock that can still be sold.
    #[inline]
    pub fn available_stock(&self) -> i64 {
        self.current_stock - self.reserved_stock
    }
}

/// Kind of stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementType {
    /// Goods received, or returned by a refund.
    In,
    /// Goods sold.
    Out,
    /// Goods moved between branches (one negative, one positive row).
    Transfer,
    /// Stock count correction.
    Adjustment,
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Transfer => "TRANSFER",
            MovementType::Adjustment => "ADJUSTMENT",
        };
        f.write_str(s)
    }
}

/// Append-only audit record of one inventory change.
///
/// `quantity` is signed: OUT rows are negative, IN rows positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: String,
    pub product_id: i64,
    pub branch_id: i64,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost_cents: Option<i64>,
    /// Business reference, e.g. `SALE-<sale id>` or `REFUND-<sale number>`.
    pub reference: String,
    pub notes: Option<String>,
    /// Sale item that caused this movement (sales and refunds only).
    pub sale_item_id: Option<String>,
    pub created_by: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// One row of the low-stock report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LowStockItem {
    pub product_id: i64,
    pub product_name: String,
    pub branch_id: i64,
    pub current_stock: i64,
    pub reorder_level: i64,
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Mobile,
    /// Store credit / on account.
    Credit,
}

/// Payment status of a sale. `Completed → Refunded` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Completed,
    Refunded,
}

// =============================================================================
// Sale
// =============================================================================

/// A committed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub sale_number: String,
    pub branch_id: i64,
    pub customer_id: Option<i64>,
    pub cashier_id: i64,
    #[serde(rename = "subTotalCents")]
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,
    pub discount_bps: u32,
    pub total_cents: i64,
    /// Loyalty points credited when the sale committed.
    pub points_earned: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub notes: Option<String>,
    pub refund_reason: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    #[inline]
    pub fn is_refunded(&self) -> bool {
        self.payment_status == PaymentStatus::Refunded
    }
}

/// A line of a sale. Product name and price are frozen at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub tax_rate_bps: u32,
    /// quantity × unit price, before tax and discount.
    pub line_total_cents: i64,
    /// This line's share of the sale tax.
    pub tax_cents: i64,
    /// This line's share of the sale discount.
    pub discount_cents: i64,
    /// Position in the submitted cart.
    pub line_no: i64,
}

/// A sale with its items, as returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleDetails {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

/// What a successful commit returns. Stored verbatim under the idempotency
/// key so a retried submission gets the identical answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleReceipt {
    pub sale_id: String,
    pub sale_number: String,
    pub branch_id: i64,
    pub customer_id: Option<i64>,
    #[serde(rename = "subTotalCents")]
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub points_earned: i64,
    pub payment_method: PaymentMethod,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// One requested cart line. The price comes from the catalog, not the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: i64,
    pub quantity: i64,
}

// =============================================================================
// Loyalty
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoyaltyTransactionType {
    Earned,
    Redeemed,
    Expired,
    Adjusted,
}

/// Append-only loyalty ledger entry. `points` is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyTransaction {
    pub id: String,
    pub customer_id: i64,
    pub sale_id: Option<String>,
    pub transaction_type: LoyaltyTransactionType,
    pub points: i64,
    pub description: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_stock() {
        let level = InventoryLevel {
            product_id: 7,
            branch_id: 1,
            current_stock: 10,
            reserved_stock: 3,
            updated_at: Utc::now(),
        };
        assert_eq!(level.available_stock(), 7);
    }

    #[test]
    fn test_discount_rate_conversion() {
        assert_eq!(DiscountRate::from_percentage(0.0).unwrap().bps(), 0);
        assert_eq!(DiscountRate::from_percentage(10.0).unwrap().bps(), 1000);
        assert_eq!(DiscountRate::from_percentage(100.0).unwrap().bps(), 10_000);
        assert!(DiscountRate::from_percentage(f64::NAN).is_err());
        assert_eq!(DiscountRate::from_bps(20_000).bps(), 10_000);
    }

    #[test]
    fn test_discount_rate_keeps_exact_hundredths() {
        assert_eq!(DiscountRate::from_percentage(33.33).unwrap().bps(), 3333);
        assert_eq!(DiscountRate::from_percentage(0.01).unwrap().bps(), 1);
        assert_eq!(DiscountRate::from_percentage(12.5).unwrap().bps(), 1250);
    }

    #[test]
    fn test_discount_rate_rejects_sub_basis_point_precision() {
        for pct in [12.345, 0.004, 33.335, 99.999] {
            let err = DiscountRate::from_percentage(pct).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidFormat { ref field, .. } if field == "discount_percent"),
                "{pct} should be rejected"
            );
        }
    }

    #[test]
    fn test_receipt_wire_names() {
        let receipt = SaleReceipt {
            sale_id: "s1".into(),
            sale_number: "MAIN-000001".into(),
            branch_id: 1,
            customer_id: None,
            subtotal_cents: 3000,
            tax_cents: 300,
            discount_cents: 300,
            total_cents: 3000,
            points_earned: 0,
            payment_method: PaymentMethod::Cash,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["subTotalCents"], 3000);
        assert_eq!(json["taxCents"], 300);
        assert_eq!(json["discountCents"], 300);
        assert!(json.get("subtotalCents").is_none());

        // Sale header uses the same name as the receipt
        let sale = Sale {
            id: "s1".into(),
            sale_number: "MAIN-000001".into(),
            branch_id: 1,
            customer_id: None,
            cashier_id: 9,
            subtotal_cents: 3000,
            tax_cents: 300,
            discount_cents: 300,
            discount_bps: 1000,
            total_cents: 3000,
            points_earned: 0,
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::Completed,
            notes: None,
            refund_reason: None,
            created_at: Utc::now(),
            refunded_at: None,
        };
        let json = serde_json::to_value(&sale).unwrap();
        assert_eq!(json["subTotalCents"], 3000);
        assert!(json.get("subtotalCents").is_none());
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&MovementType::Adjustment).unwrap(),
            "\"ADJUSTMENT\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::Mobile).unwrap(),
            "\"mobile\""
        );
        assert_eq!(
            serde_json::to_string(&LoyaltyTransactionType::Earned).unwrap(),
            "\"EARNED\""
        );
        assert_eq!(PaymentStatus::default(), PaymentStatus::Completed);
    }

    #[test]
    fn test_cart_line_uses_camel_case() {
        let line: CartLine = serde_json::from_str(r#"{"productId":7,"quantity":3}"#).unwrap();
        assert_eq!(line.product_id, 7);
        assert_eq!(line.quantity, 3);
    }
}
