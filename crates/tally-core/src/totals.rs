//! # Totals Calculator
//!
//! Turns priced cart lines and a whole-sale discount into the figures stored
//! on a sale and its items.
//!
//! ## Computation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sale Totals                                    │
//! │                                                                         │
//! │  line_total   = quantity × unit_price                (exact cents)      │
//! │  subtotal     = Σ line_total                         (exact cents)      │
//! │                                                                         │
//! │  tax_exact    = Σ line_total × tax_bps               (1/10000 cent)     │
//! │  disc_exact   = subtotal × discount_bps              (1/10000 cent)     │
//! │                                                                         │
//! │  tax          = round_half_even(tax_exact  / 10000)  ◄── only rounding  │
//! │  discount     = round_half_even(disc_exact / 10000)  ◄── only rounding  │
//! │                                                                         │
//! │  total        = subtotal + tax − discount                               │
//! │                                                                         │
//! │  Tax is computed on the pre-discount subtotal. The discount never       │
//! │  reduces tax.                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-line tax and discount shares are the rounded header figures split by
//! largest remainder, so line shares always add up to the header exactly.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::{round_half_even, Money};
use crate::types::{DiscountRate, TaxRate};
use crate::validation::{validate_price_cents, validate_quantity, validate_tax_rate_bps, ValidationResult};
use crate::{BPS_SCALE, MAX_CART_LINES};

// =============================================================================
// Input / Output
// =============================================================================

/// A cart line with its catalog price and tax rate attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub tax_rate: TaxRate,
}

/// Computed figures for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTotals {
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub tax_rate_bps: u32,
    pub line_total_cents: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,
}

/// Computed figures for a whole sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleTotals {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    /// Same order as the input lines.
    pub lines: Vec<LineTotals>,
}

impl SaleTotals {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Calculator
// =============================================================================

/// Computes sale totals.
///
/// ## Errors
/// `ValidationError` for an empty or oversized cart, a non-positive quantity,
/// a negative price, an out-of-range tax rate, or amounts too large to
/// represent.
///
/// ## Example
/// ```rust
/// use tally_core::totals::{calculate_totals, PricedLine};
/// use tally_core::types::{DiscountRate, TaxRate};
///
/// let lines = [
///     PricedLine { product_id: 1, quantity: 1, unit_price_cents: 105, tax_rate: TaxRate::from_bps(1000) },
///     PricedLine { product_id: 2, quantity: 1, unit_price_cents: 105, tax_rate: TaxRate::from_bps(1000) },
/// ];
/// // Per line the tax is 10.5 cents. Rounding once gives 21, not 10 + 10 or 11 + 11.
/// let totals = calculate_totals(&lines, DiscountRate::none()).unwrap();
/// assert_eq!(totals.tax_cents, 21);
/// assert_eq!(totals.lines[0].tax_cents + totals.lines[1].tax_cents, 21);
/// ```
pub fn calculate_totals(lines: &[PricedLine], discount: DiscountRate) -> ValidationResult<SaleTotals> {
    if lines.is_empty() {
        return Err(ValidationError::Empty {
            field: "lines".to_string(),
        });
    }
    if lines.len() > MAX_CART_LINES {
        return Err(ValidationError::out_of_range("lines", 1, MAX_CART_LINES as i64));
    }

    let mut subtotal = Money::zero();
    let mut line_totals = Vec::with_capacity(lines.len());
    let mut tax_weights = Vec::with_capacity(lines.len());

    for line in lines {
        validate_quantity(line.quantity)?;
        validate_price_cents(line.unit_price_cents)?;
        validate_tax_rate_bps(line.tax_rate.bps())?;

        let line_total = Money::from_cents(line.unit_price_cents)
            .checked_mul_quantity(line.quantity)
            .ok_or_else(|| ValidationError::overflow("line total"))?;
        subtotal = subtotal
            .checked_add(line_total)
            .ok_or_else(|| ValidationError::overflow("subtotal"))?;

        tax_weights.push(line_total.scaled_by_bps(line.tax_rate.bps()));
        line_totals.push(line_total);
    }

    let scale = BPS_SCALE as i128;
    let tax_exact: i128 = tax_weights.iter().sum();
    let tax_cents = narrow(round_half_even(tax_exact, scale), "tax")?;

    let discount_weights: Vec<i128> = line_totals
        .iter()
        .map(|total| total.scaled_by_bps(discount.bps()))
        .collect();
    let discount_exact = subtotal.scaled_by_bps(discount.bps());
    let discount_cents = narrow(round_half_even(discount_exact, scale), "discount")?;

    let total_cents = subtotal
        .cents()
        .checked_add(tax_cents)
        .and_then(|t| t.checked_sub(discount_cents))
        .ok_or_else(|| ValidationError::overflow("total"))?;

    let tax_shares = allocate(tax_cents, &tax_weights, scale);
    let discount_shares = allocate(discount_cents, &discount_weights, scale);

    let lines = lines
        .iter()
        .zip(line_totals)
        .zip(tax_shares.into_iter().zip(discount_shares))
        .map(|((line, line_total), (tax, discount))| LineTotals {
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price_cents: line.unit_price_cents,
            tax_rate_bps: line.tax_rate.bps(),
            line_total_cents: line_total.cents(),
            tax_cents: tax,
            discount_cents: discount,
        })
        .collect();

    Ok(SaleTotals {
        subtotal_cents: subtotal.cents(),
        tax_cents,
        discount_cents,
        total_cents,
        lines,
    })
}

/// Splits `amount` across lines in proportion to `weights / scale`.
///
/// Each line first gets the floor of its exact share. The cents left over go
/// one at a time to the lines with the largest fractional remainder, earlier
/// lines winning ties.
fn allocate(amount: i64, weights: &[i128], scale: i128) -> Vec<i64> {
    let mut shares: Vec<i64> = weights
        .iter()
        .map(|w| w.div_euclid(scale) as i64)
        .collect();

    let allocated: i64 = shares.iter().sum();
    let mut leftover = amount - allocated;

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = weights[a].rem_euclid(scale);
        let rb = weights[b].rem_euclid(scale);
        rb.cmp(&ra).then(a.cmp(&b))
    });

    for idx in order.into_iter().cycle() {
        if leftover <= 0 {
            break;
        }
        shares[idx] += 1;
        leftover -= 1;
    }

    shares
}

fn narrow(value: i128, field: &str) -> ValidationResult<i64> {
    i64::try_from(value).map_err(|_| ValidationError::overflow(field))
}

// =============================================================================
// Unit Tests
// =============================================================================
