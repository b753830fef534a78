//! Order book infrastructure module
//!
//! Contains price levels, the bid and ask books, and the per-key
//! partition that owns them.

pub mod ask_book;
pub mod bid_book;
pub mod partition;
pub mod price_level;

pub use ask_book::AskBook;
pub use bid_book::BidBook;
pub use partition::{CandidateRef, Partition};
pub use price_level::PriceLevel;
