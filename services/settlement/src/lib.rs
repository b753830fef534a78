//! Settlement Processor
//!
//! Turns match events into finalized Transaction records: computes
//! fees, applies the atomic ledger transfer with bounded retry on
//! contention, and hands completed transactions to the notarization
//! dispatcher off the settlement-critical path. Settlement is
//! exactly-once per match event id.

pub mod notarization;
pub mod processor;
pub mod store;

pub use notarization::{
    NotarizationDispatcher, NotarizationGateway, NotarizationPayload, NotaryConfig, NotaryQueue,
};
pub use processor::{SettlementConfig, SettlementProcessor};
pub use store::TransactionStore;
