//! Error taxonomy for the trading engine
//!
//! Rejections before reservation (`ValidationError`, the insufficient
//! variants of `LedgerError`) have no side effects. Settlement failures
//! after reservation but before the atomic ledger update roll back
//! fully; only notarization failures are non-fatal and retried.

use crate::ids::{AccountId, HoldingId, OrderId};
use crate::money::Fils;
use thiserror::Error;

/// Malformed order, rejected before any reservation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("quantity must be positive")]
    ZeroQuantity,

    #[error("price must be positive, got {price}")]
    NonPositivePrice { price: i64 },

    #[error("minimum fill {min_fill} invalid for order quantity {quantity}")]
    InvalidMinFill { min_fill: u64, quantity: u64 },

    #[error("expiry {expires_at} is not after creation {created_at}")]
    ExpiryNotAfterCreation { expires_at: i64, created_at: i64 },

    #[error("sell orders must name the holding lot")]
    MissingHolding,

    #[error("order value overflows the cash ledger")]
    AmountOverflow,
}

/// Ledger store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Fils, available: Fils },

    #[error("insufficient inventory in lot {holding_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        holding_id: HoldingId,
        requested: u64,
        available: u64,
    },

    #[error("account not found: {account_id}")]
    AccountNotFound { account_id: AccountId },

    #[error("account already exists: {account_id}")]
    AccountExists { account_id: AccountId },

    #[error("holding not found: {holding_id}")]
    HoldingNotFound { holding_id: HoldingId },

    #[error("holding {holding_id} is not tradable")]
    HoldingNotTradable { holding_id: HoldingId },

    #[error("serialization conflict on a contended account")]
    ConcurrentModification,

    #[error("transfer between an account and itself")]
    SelfTransfer,

    #[error("amount overflows the cash ledger")]
    AmountOverflow,
}

/// Order lookup and lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("order not found: {order_id}")]
    NotFound { order_id: OrderId },

    #[error("order {order_id} does not belong to the requesting account")]
    NotOwner { order_id: OrderId },

    #[error("order {order_id} is already in a terminal state")]
    AlreadyTerminal { order_id: OrderId },
}

/// Settlement processor errors.
///
/// Any variant here means the match was NOT applied: reservations and
/// order remainders are exactly as they were before the attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("ledger rejected the settlement: {0}")]
    Ledger(#[from] LedgerError),

    #[error("settlement retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    #[error("no escrow recorded for order {order_id}")]
    EscrowMissing { order_id: OrderId },
}

/// Notarization gateway errors.
///
/// Never unwinds a completed trade; the transaction stays economically
/// final with settlement status pending.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotarizationError {
    #[error("notarization network unavailable: {0}")]
    Unavailable(String),

    #[error("notarization request timed out")]
    Timeout,

    #[error("notarization rejected: {0}")]
    Rejected(String),
}

/// Top-level error returned by the exchange surface
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("order error: {0}")]
    Order(#[from] OrderError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),
}
