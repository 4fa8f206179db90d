//! Fixed-scale decimal money. Balances are quantized to four fractional
//! digits; commission math is quantized to two before being widened back
//! to the balance scale.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Fractional digits carried by account balances and ledger amounts.
pub const BALANCE_SCALE: u32 = 4;
/// Fractional digits used when rounding a commission rate before it is
/// widened back to [`BALANCE_SCALE`].
pub const FEE_SCALE: u32 = 2;

/// A non-negative-by-convention monetary amount, quantized to
/// [`BALANCE_SCALE`] with half-even rounding applied at every
/// construction site. `Money` never panics on overflow; every
/// arithmetic operation that can fail returns `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    /// Quantizes `d` to [`BALANCE_SCALE`] using round-half-to-even.
    pub fn from_decimal(d: Decimal) -> Self {
        Money(d.round_dp_with_strategy(BALANCE_SCALE, RoundingStrategy::MidpointNearestEven))
    }

    pub fn from_i64(whole: i64) -> Self {
        Money::from_decimal(Decimal::from(whole))
    }

    pub fn parse(s: &str) -> Option<Self> {
        Decimal::from_str(s).ok().map(Money::from_decimal)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money::from_decimal)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money::from_decimal)
    }

    /// Saturating subtraction used only where the caller has already
    /// proven `self >= other` via an explicit guard; prefer
    /// [`Money::checked_sub`] everywhere else.
    pub fn sub_unchecked(self, other: Money) -> Money {
        Money::from_decimal(self.0 - other.0)
    }

    /// Multiplies by a bare `Decimal` rate and rounds to [`FEE_SCALE`]
    /// before widening back to [`BALANCE_SCALE`] — the fee-rounding rule
    /// from / 9.
    pub fn mul_rate_rounded(self, rate: Decimal) -> Money {
        let raw = self.0 * rate;
        let rounded = raw.round_dp_with_strategy(FEE_SCALE, RoundingStrategy::MidpointNearestEven);
        Money::from_decimal(rounded)
    }

    pub fn checked_mul_u32(self, factor: u32) -> Option<Money> {
        self.0
            .checked_mul(Decimal::from(factor))
            .map(Money::from_decimal)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", BALANCE_SCALE as usize, self.0)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money::from_decimal(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money::from_decimal(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}
