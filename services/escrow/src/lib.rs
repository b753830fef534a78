//! Escrow Manager
//!
//! Reserves cash and certificate inventory against open orders before
//! they reach the book, converts the matched portion of a reservation
//! into a settlement transfer, and releases exactly the unmatched
//! remainder on cancellation or expiry. Owner of the invariant that the
//! sum of reserved cash equals the sum of outstanding buy-side
//! commitments.

pub mod manager;

pub use manager::{EscrowManager, OrderEscrow};
