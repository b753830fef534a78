//! Order lifecycle types

use crate::certificate::CertificateKey;
use crate::errors::ValidationError;
use crate::ids::{AccountId, HoldingId, OrderId};
use crate::money::{total_amount, Fils};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Why an order was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    UserRequested,
    System,
}

/// Order status
///
/// Filled, Cancelled, and Expired are terminal: once reached, the order
/// is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason")]
pub enum OrderStatus {
    #[serde(rename = "OPEN")]
    Open,

    #[serde(rename = "PARTIALLY_FILLED")]
    PartiallyFilled,

    #[serde(rename = "FILLED")]
    Filled,

    #[serde(rename = "CANCELLED")]
    Cancelled(CancelReason),

    #[serde(rename = "EXPIRED")]
    Expired,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled(_) | OrderStatus::Expired
        )
    }
}

/// An intent to buy or sell certificates.
///
/// Buy orders carry selection criteria only; sell orders additionally
/// name the specific holding lot backing them. `created_at` is the
/// time-priority tie-break among equal prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub side: Side,
    pub key: CertificateKey,
    /// Lot backing a sell order; None for buys
    pub holding_id: Option<HoldingId>,
    /// Price per certificate in fils
    pub price: Fils,
    pub quantity: u64,
    pub filled_quantity: u64,
    pub remaining_quantity: u64,
    pub allow_partial_fill: bool,
    pub min_fill_quantity: Option<u64>,
    pub status: OrderStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: Option<i64>,
    pub version: u64,
}

impl Order {
    /// Create a new open order
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: AccountId,
        side: Side,
        key: CertificateKey,
        holding_id: Option<HoldingId>,
        price: Fils,
        quantity: u64,
        allow_partial_fill: bool,
        min_fill_quantity: Option<u64>,
        expires_at: Option<i64>,
        timestamp: i64,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            account_id,
            side,
            key,
            holding_id,
            price,
            quantity,
            filled_quantity: 0,
            remaining_quantity: quantity,
            allow_partial_fill,
            min_fill_quantity,
            status: OrderStatus::Open,
            created_at: timestamp,
            updated_at: timestamp,
            expires_at,
            version: 0,
        }
    }

    /// Validate the order before any reservation is attempted.
    ///
    /// A rejected order has no side effects anywhere in the engine.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity == 0 {
            return Err(ValidationError::ZeroQuantity);
        }
        if !self.price.is_positive() {
            return Err(ValidationError::NonPositivePrice {
                price: self.price.raw(),
            });
        }
        if let Some(min_fill) = self.min_fill_quantity {
            if min_fill == 0 || min_fill > self.quantity {
                return Err(ValidationError::InvalidMinFill {
                    min_fill,
                    quantity: self.quantity,
                });
            }
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= self.created_at {
                return Err(ValidationError::ExpiryNotAfterCreation {
                    expires_at,
                    created_at: self.created_at,
                });
            }
        }
        if self.side == Side::Sell && self.holding_id.is_none() {
            return Err(ValidationError::MissingHolding);
        }
        if total_amount(self.price, self.quantity).is_none() {
            return Err(ValidationError::AmountOverflow);
        }
        Ok(())
    }

    /// Check quantity invariant: filled + remaining = total
    pub fn check_invariant(&self) -> bool {
        self.filled_quantity + self.remaining_quantity == self.quantity
    }

    pub fn is_filled(&self) -> bool {
        self.filled_quantity == self.quantity
    }

    pub fn has_fills(&self) -> bool {
        self.filled_quantity > 0
    }

    /// Whether the order's expiry deadline has passed
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Apply a fill and adjust status
    ///
    /// # Panics
    /// Panics if the order is terminal or the fill exceeds the remainder
    pub fn add_fill(&mut self, fill_quantity: u64, timestamp: i64) {
        assert!(!self.status.is_terminal(), "Cannot fill a terminal order");
        assert!(
            fill_quantity <= self.remaining_quantity,
            "Fill would exceed order quantity"
        );

        self.filled_quantity += fill_quantity;
        self.remaining_quantity -= fill_quantity;

        if self.is_filled() {
            self.status = OrderStatus::Filled;
        } else if self.has_fills() {
            self.status = OrderStatus::PartiallyFilled;
        }

        self.updated_at = timestamp;
        self.version += 1;

        assert!(self.check_invariant(), "Invariant violated after fill");
    }

    /// Cancel the still-open remainder of the order
    ///
    /// # Panics
    /// Panics if the order is already in a terminal state
    pub fn cancel(&mut self, reason: CancelReason, timestamp: i64) {
        assert!(!self.status.is_terminal(), "Cannot cancel terminal order");

        self.status = OrderStatus::Cancelled(reason);
        self.updated_at = timestamp;
        self.version += 1;
    }

    /// Expire the still-open remainder of the order
    ///
    /// # Panics
    /// Panics if the order is already in a terminal state
    pub fn expire(&mut self, timestamp: i64) {
        assert!(!self.status.is_terminal(), "Cannot expire terminal order");

        self.status = OrderStatus::Expired;
        self.updated_at = timestamp;
        self.version += 1;
    }
}
