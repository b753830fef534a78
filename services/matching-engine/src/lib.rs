//! Matching Engine Service
//!
//! Partitioned order book and price-time priority matching. Each
//! certificate-selection key owns an independent book partition; within
//! a partition, the best price wins and ties go to the earliest
//! submission. The engine proposes fills to the settlement layer and
//! only commits them to the book once the ledger transfer has been
//! applied.

pub mod book;
pub mod engine;
pub mod events;

pub use engine::{BookSnapshot, MatchingEngine, SettlementHandler, SubmissionReport};
pub use events::MatchEvent;
