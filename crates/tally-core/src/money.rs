//! # Money Module
//!
//! Provides the `Money` type and the rounding rule used for every figure the
//! engine reports.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌                                  │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents                                            │
//! │    Stored amounts are i64 cents.                                        │
//! │    Intermediate tax/discount figures are i128 in 1/10000 of a cent      │
//! │    (cents × basis points), so nothing is lost until the single          │
//! │    rounding step at the end.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::money::{round_half_even, Money};
//!
//! let price = Money::from_cents(1099);
//! assert_eq!((price * 2).cents(), 2198);
//!
//! // 0.5 cent rounds to the even neighbour
//! assert_eq!(round_half_even(5_000, 10_000), 0);
//! assert_eq!(round_half_even(15_000, 10_000), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use ts_rs::TS;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: refunds and reversals are negative
/// - **Single field tuple struct**: zero-cost wrapper over i64
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(1099).units(), 10);
    /// assert_eq!(Money::from_cents(-550).units(), -5);
    /// ```
    #[inline]
    pub const fn units(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Zero.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// let line = Money::from_cents(299).checked_mul_quantity(3).unwrap();
    /// assert_eq!(line.cents(), 897);
    /// assert!(Money::from_cents(i64::MAX).checked_mul_quantity(2).is_none());
    /// ```
    #[inline]
    pub fn checked_mul_quantity(&self, qty: i64) -> Option<Self> {
        self.0.checked_mul(qty).map(Money)
    }

    /// Adds two amounts, returning `None` on overflow.
    #[inline]
    pub fn checked_add(&self, other: Money) -> Option<Self> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Returns `self × bps` at full precision, in 1/10000 of a cent.
    ///
    /// ## Example
    /// ```rust
    /// use tally_core::money::Money;
    ///
    /// // $10.00 at 8.25% = 82.5 cents = 825_000 ten-thousandths
    /// assert_eq!(Money::from_cents(1000).scaled_by_bps(825), 825_000);
    /// ```
    #[inline]
    pub fn scaled_by_bps(&self, bps: u32) -> i128 {
        self.0 as i128 * bps as i128
    }
}

// =============================================================================
// Rounding
// =============================================================================

/// Divides `value` by `divisor` rounding half to even (bankers rounding).
///
/// ## Bankers Rounding
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────┐
/// │  Half-up always rounds 0.5 away:   0.5 → 1, 1.5 → 2, 2.5 → 3       │
/// │  Half-to-even picks the even side: 0.5 → 0, 1.5 → 2, 2.5 → 2       │
/// │                                                                     │
/// │  Over many sales half-to-even carries no systematic bias.           │
/// └─────────────────────────────────────────────────────────────────────┘
/// ```
///
/// `divisor` must be positive. Negative values round symmetrically.
///
/// ## Example
/// ```rust
/// use tally_core::money::round_half_even;
///
/// assert_eq!(round_half_even(825_000, 10_000), 82);   // 82.5 → 82
/// assert_eq!(round_half_even(835_000, 10_000), 84);   // 83.5 → 84
/// assert_eq!(round_half_even(825_001, 10_000), 83);
/// assert_eq!(round_half_even(-25_000, 10_000), -2);
/// ```
pub fn round_half_even(value: i128, divisor: i128) -> i128 {
    debug_assert!(divisor > 0, "divisor must be positive");

    let quotient = value.div_euclid(divisor);
    let remainder = value.rem_euclid(divisor);
    let twice = remainder * 2;

    if twice > divisor || (twice == divisor && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-friendly display. Clients format for their own locale.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.units().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
