//! # Loyalty Accrual
//!
//! Point derivation for sales and refunds. Applying points to a customer
//! happens in storage, inside the same transaction as the sale.
//!
//! ## Rate
//! The rate is points per currency unit, held in basis points so it stays an
//! integer: `10000` means one point per unit (1.0), `2500` means a quarter.
//!
//! ```text
//! points = floor(total_cents × rate_bps / (100 × 10000))
//!
//! total 30.00, rate 1.0   → floor(3000 × 10000 / 1_000_000) = 30
//! total 30.99, rate 1.0   → 30
//! total 30.00, rate 0.25  → 7
//! ```

use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::BPS_SCALE;

/// Highest configurable rate, in points per currency unit.
pub const MAX_POINTS_PER_UNIT: f64 = 100.0;

/// Points per currency unit, in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyRate(u32);

impl LoyaltyRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        LoyaltyRate(bps)
    }

    /// Converts a configured rate such as `1.0` or `0.25`.
    ///
    /// Negative and non-finite values become zero.
    pub fn from_points_per_unit(rate: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return LoyaltyRate(0);
        }
        LoyaltyRate((rate * BPS_SCALE as f64).round().min(u32::MAX as f64) as u32)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }
}

impl Default for LoyaltyRate {
    fn default() -> Self {
        LoyaltyRate(BPS_SCALE)
    }
}

/// Points earned for a sale total. Never negative.
///
/// ## Example
/// ```rust
/// use tally_core::loyalty::{points_earned, LoyaltyRate};
/// use tally_core::money::Money;
///
/// assert_eq!(points_earned(Money::from_cents(3000), LoyaltyRate::default()), 30);
/// ```
pub fn points_earned(total: Money, rate: LoyaltyRate) -> i64 {
    if !total.is_positive() {
        return 0;
    }
    let scaled = total.cents() as i128 * rate.bps() as i128;
    i64::try_from(scaled / (100 * BPS_SCALE as i128)).unwrap_or(i64::MAX)
}

/// How much of a sale's points a refund can take back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsReversal {
    /// Points actually removed from the balance.
    pub deducted: i64,
    /// Points that could not be removed because the balance was too low.
    pub shortfall: i64,
}

impl PointsReversal {
    #[inline]
    pub fn is_clamped(&self) -> bool {
        self.shortfall > 0
    }
}

/// Reverses `earned` points against a current `balance`, never taking the
/// balance below zero.
///
/// ## Example
/// ```rust
/// use tally_core::loyalty::reverse_points;
///
/// let full = reverse_points(30, 100);
/// assert_eq!((full.deducted, full.shortfall), (30, 0));
///
/// // Customer already spent most of the points
/// let clamped = reverse_points(30, 12);
/// assert_eq!((clamped.deducted, clamped.shortfall), (12, 18));
/// ```
pub fn reverse_points(earned: i64, balance: i64) -> PointsReversal {
    let earned = earned.max(0);
    let deducted = earned.min(balance.max(0));
    PointsReversal {
        deducted,
        shortfall: earned - deducted,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
