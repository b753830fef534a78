//! Ledger Store
//!
//! Persistent holder of per-account cash balances, reserved cash,
//! certificate holdings, and reserved certificate quantity. No business
//! logic lives here: the store exposes atomic check-and-update
//! operations, serialized per account, and reports every successful
//! mutation to the audit recorder with before/after balances.

pub mod store;

pub use store::{LedgerStore, SettlementTerms};
