//! Exchange facade
//!
//! Wires the ledger, escrow manager, matching engine, settlement
//! processor, and notarization dispatcher into one service and exposes
//! the trading surface: order submission and cancellation, book and
//! entity queries, balance views, and the expiry sweeper. Callers
//! arrive with an already-verified account identifier; no credential
//! checks happen here.

pub mod service;

pub use service::{
    BuyOrderRequest, Exchange, ExchangeConfig, OrderReceipt, SellOrderRequest,
};
