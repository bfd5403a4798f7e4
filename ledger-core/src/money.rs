//! Fixed-point money
//!
//! Every monetary value in the ledger is a [`Money`]: a `Decimal` held at
//! exactly two fractional digits. Arithmetic never goes through floating
//! point, so totals reconcile to the cent.
//!
//! Stored amounts never exceed [`Money::MAX`]. Balances and totals that
//! accumulate over time go through the `checked_*` methods, which fail with
//! [`Error::Overflow`] instead of panicking.

use crate::error::{Error, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// Number of fractional digits carried by every amount
pub const SCALE: u32 = 2;

/// Monetary amount with two fractional digits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Largest amount the ledger accepts or stores: 10^15 currency units
    pub const MAX: Money = Money(Decimal::from_parts(1_569_325_056, 23_283_064, 0, false, SCALE));

    /// Create from a decimal, rounding half away from zero to cents
    pub fn new(value: Decimal) -> Self {
        let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(SCALE);
        Self(rounded)
    }

    /// Create from an integer number of cents
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, SCALE))
    }

    /// Create from a whole number of currency units
    pub fn from_major(units: i64) -> Self {
        Self::new(Decimal::from(units))
    }

    /// Underlying decimal
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Exactly zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self - other`, floored at zero
    pub fn saturating_sub(self, other: Money) -> Money {
        if other >= self {
            Money::ZERO
        } else {
            self - other
        }
    }

    /// Clamp negative values to zero
    pub fn floor_zero(self) -> Money {
        if self.is_negative() {
            Money::ZERO
        } else {
            self
        }
    }

    /// `self` as a percentage of `whole`, rounded to two places.
    /// Returns zero when `whole` is zero.
    pub fn percent_of(self, whole: Money) -> Decimal {
        if whole.is_zero() {
            return Decimal::ZERO;
        }
        (self.0 / whole.0 * Decimal::ONE_HUNDRED).round_dp(2)
    }

    /// Magnitude above [`Money::MAX`]
    pub fn exceeds_max(&self) -> bool {
        self.0.abs() > Money::MAX.0
    }

    /// `self + rhs`, failing past [`Money::MAX`]
    pub fn checked_add(self, rhs: Money) -> Result<Money> {
        Self::bounded(self.0.checked_add(rhs.0), || format!("{} + {}", self, rhs))
    }

    /// `self - rhs`, failing past [`Money::MAX`] in either direction
    pub fn checked_sub(self, rhs: Money) -> Result<Money> {
        Self::bounded(self.0.checked_sub(rhs.0), || format!("{} - {}", self, rhs))
    }

    /// Multiply by a count (e.g. monthly charge × months)
    pub fn checked_mul(self, count: u32) -> Result<Money> {
        Self::bounded(self.0.checked_mul(Decimal::from(count)), || {
            format!("{} * {}", self, count)
        })
    }

    fn bounded(value: Option<Decimal>, expr: impl FnOnce() -> String) -> Result<Money> {
        match value.map(Money::new) {
            Some(result) if !result.exceeds_max() => Ok(result),
            _ => Err(Error::Overflow(expr())),
        }
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Money::new)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}
