//! Integer minor-currency arithmetic
//!
//! All balances, prices, and fees are held in fils (1/100 AED) as
//! integers, so money arithmetic is exact. The only place fractional
//! values appear is fee-rate multiplication, which goes through the
//! single rounding policy in this module.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// An amount of money in fils.
///
/// Amounts stored on accounts are always non-negative; intermediate
/// arithmetic uses checked operations where overflow is reachable.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fils(i64);

impl Fils {
    pub const ZERO: Fils = Fils(0);

    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Fils) -> Option<Fils> {
        self.0.checked_add(other.0).map(Fils)
    }

    pub fn checked_sub(self, other: Fils) -> Option<Fils> {
        self.0.checked_sub(other.0).map(Fils)
    }

    /// Multiply a per-unit amount by a certificate quantity.
    pub fn checked_mul_quantity(self, quantity: u64) -> Option<Fils> {
        let qty = i64::try_from(quantity).ok()?;
        self.0.checked_mul(qty).map(Fils)
    }
}

impl Add for Fils {
    type Output = Fils;

    fn add(self, other: Fils) -> Fils {
        Fils(self.0 + other.0)
    }
}

impl AddAssign for Fils {
    fn add_assign(&mut self, other: Fils) {
        self.0 += other.0;
    }
}

impl Sub for Fils {
    type Output = Fils;

    fn sub(self, other: Fils) -> Fils {
        Fils(self.0 - other.0)
    }
}

impl SubAssign for Fils {
    fn sub_assign(&mut self, other: Fils) {
        self.0 -= other.0;
    }
}

impl Sum for Fils {
    fn sum<I: Iterator<Item = Fils>>(iter: I) -> Fils {
        iter.fold(Fils::ZERO, |acc, x| acc + x)
    }
}

impl fmt::Display for Fils {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fils", self.0)
    }
}

/// Total amount for `quantity` certificates at `price` per unit.
///
/// Returns None on i64 overflow.
pub fn total_amount(price: Fils, quantity: u64) -> Option<Fils> {
    price.checked_mul_quantity(quantity)
}

/// Apply a percentage rate to an amount, rounding to the nearest fils.
///
/// Ties round up so fractional revenue accrues to the platform rather
/// than being lost. This is the single rounding policy for all fee
/// arithmetic; nothing else in the engine rounds money.
pub fn percentage_of(amount: Fils, rate: Decimal) -> Fils {
    let gross = Decimal::from(amount.raw()) * rate;
    let rounded = gross.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    Fils::new(rounded.to_i64().unwrap_or(i64::MAX))
}

/// Apply a percentage rate to an amount, rounding up.
///
/// Used for escrow estimates, which must upper-bound every fee the
/// reservation can be asked to cover.
pub fn percentage_ceil(amount: Fils, rate: Decimal) -> Fils {
    let gross = Decimal::from(amount.raw()) * rate;
    Fils::new(gross.ceil().to_i64().unwrap_or(i64::MAX))
}
