//! Fee schedule
//!
//! Buyer and seller fees are each a configured percentage of the trade
//! value, computed independently through the rounding policy in
//! [`crate::money`]. The notarization fee is a fixed per-transaction
//! amount charged to the buyer.

use crate::money::{percentage_ceil, percentage_of, Fils};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Platform fee configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Buyer-side fee rate as a fraction of total amount
    pub buyer_rate: Decimal,
    /// Seller-side fee rate as a fraction of total amount
    pub seller_rate: Decimal,
    /// Fixed per-transaction fee charged to the buyer
    pub notarization_fee: Fils,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            // 0.25% each side
            buyer_rate: Decimal::new(25, 4),
            seller_rate: Decimal::new(25, 4),
            // 1 AED per recorded transaction
            notarization_fee: Fils::new(100),
        }
    }
}

impl FeeSchedule {
    /// Buyer fee for a trade value, ties rounded up
    pub fn buyer_fee(&self, total: Fils) -> Fils {
        percentage_of(total, self.buyer_rate)
    }

    /// Seller fee for a trade value, ties rounded up
    pub fn seller_fee(&self, total: Fils) -> Fils {
        percentage_of(total, self.seller_rate)
    }

    /// Per-unit cash commitment reserved for one unit of a buy order.
    ///
    /// Upper-bounds everything a single unit can cost at settlement:
    /// the limit price, the buyer fee on it (rounded up), and a full
    /// notarization fee. Reserving per unit makes cancellation release
    /// exactly proportional to the unmatched remainder, and no sequence
    /// of partial fills at clearing prices at or below the limit can
    /// exceed the reservation.
    pub fn buy_reserve_per_unit(&self, price: Fils) -> Fils {
        price + percentage_ceil(price, self.buyer_rate) + self.notarization_fee
    }
}
