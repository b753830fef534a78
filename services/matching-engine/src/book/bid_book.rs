//! Bid (buy-side) order book
//!
//! Maintains buy orders sorted by price descending (best bid first).
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use std::collections::HashSet;
use types::ids::OrderId;
use types::money::Fils;
use types::order::Order;

use super::partition::CandidateRef;
use super::price_level::PriceLevel;

/// Bid (buy) side order book
///
/// Orders are sorted by price descending, so the highest bid is first.
/// At each price level, orders are maintained in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    /// Price levels; BTreeMap iterates ascending, so best-bid walks use
    /// the reversed iterator
    levels: BTreeMap<Fils, PriceLevel>,
}

impl BidBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order into the bid book
    pub fn insert(&mut self, order: &Order) {
        let level = self.levels.entry(order.price).or_default();
        level.insert(
            order.order_id,
            order.account_id,
            order.remaining_quantity,
            order.created_at,
        );
    }

    /// Remove an order from the bid book
    ///
    /// Returns true if the order was found and removed
    pub fn remove(&mut self, order_id: &OrderId, price: Fils) -> bool {
        if let Some(level) = self.levels.get_mut(&price) {
            if level.remove(order_id).is_some() {
                if level.is_empty() {
                    self.levels.remove(&price);
                }
                return true;
            }
        }
        false
    }

    /// Reduce a resting order's quantity after a fill.
    ///
    /// Returns the remaining quantity, or None if the order is not here.
    pub fn reduce(&mut self, order_id: &OrderId, price: Fils, by: u64) -> Option<u64> {
        let level = self.levels.get_mut(&price)?;
        let left = level.reduce(order_id, by)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(left)
    }

    /// Get the best bid (highest price) and its resting quantity
    pub fn best_bid(&self) -> Option<(Fils, u64)> {
        self.levels
            .iter()
            .next_back()
            .map(|(price, level)| (*price, level.total_quantity()))
    }

    /// Best-priced, earliest resting bid at or above the limit that is
    /// not in the skip set.
    ///
    /// Lazy and restartable: each call re-queries the live book, so the
    /// matching walk can mutate state between calls and resume where it
    /// left off by growing the skip set.
    pub fn next_candidate(&self, limit: Fils, skip: &HashSet<OrderId>) -> Option<CandidateRef> {
        for (price, level) in self.levels.iter().rev() {
            if *price < limit {
                break;
            }
            for entry in level.iter() {
                if !skip.contains(&entry.order_id) {
                    return Some(CandidateRef {
                        order_id: entry.order_id,
                        account_id: entry.account_id,
                        price: *price,
                        remaining: entry.remaining,
                        created_at: entry.created_at,
                    });
                }
            }
        }
        None
    }

    /// Get depth snapshot (top N price levels, best first)
    pub fn depth_snapshot(&self, depth: usize) -> Vec<(Fils, u64)> {
        self.levels
            .iter()
            .rev()
            .take(depth)
            .map(|(price, level)| (*price, level.total_quantity()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::certificate::{CertificateKey, CertificationStandard, Emirate, EnergyType};
    use types::ids::{AccountId, FacilityId};
    use types::order::Side;

    const TS: i64 = 1_708_123_456_789_000_000;

    fn key() -> CertificateKey {
        CertificateKey {
            facility: FacilityId::new("SHAMS-1"),
            energy_type: EnergyType::Solar,
            vintage: 2024,
            emirate: Emirate::AbuDhabi,
            standard: CertificationStandard::IRec,
        }
    }

    fn bid(price: i64, quantity: u64, ts: i64) -> Order {
        Order::new(
            AccountId::new(),
            Side::Buy,
            key(),
            None,
            Fils::new(price),
            quantity,
            true,
            None,
            None,
            ts,
        )
    }

    #[test]
    fn test_bid_book_best_bid() {
        let mut book = BidBook::new();
        book.insert(&bid(5_000, 10, TS));
        book.insert(&bid(5_100, 20, TS + 1));
        book.insert(&bid(4_900, 15, TS + 2));

        let (best_price, best_qty) = book.best_bid().unwrap();
        assert_eq!(best_price, Fils::new(5_100));
        assert_eq!(best_qty, 20);
    }

    #[test]
    fn test_bid_book_remove_cleans_empty_level() {
        let mut book = BidBook::new();
        let order = bid(5_000, 10, TS);
        book.insert(&order);

        assert!(book.remove(&order.order_id, order.price));
        assert!(book.is_empty());
        assert!(!book.remove(&order.order_id, order.price));
    }

    #[test]
    fn test_bid_book_candidate_priority() {
        let mut book = BidBook::new();
        let best = bid(5_100, 10, TS + 5);
        let earlier_same_price = bid(5_000, 10, TS);
        let later_same_price = bid(5_000, 10, TS + 1);
        book.insert(&earlier_same_price);
        book.insert(&later_same_price);
        book.insert(&best);

        let skip = HashSet::new();
        // Highest price first
        let first = book.next_candidate(Fils::new(4_000), &skip).unwrap();
        assert_eq!(first.order_id, best.order_id);

        // Then earliest at the next level
        let mut skip = HashSet::new();
        skip.insert(best.order_id);
        let second = book.next_candidate(Fils::new(4_000), &skip).unwrap();
        assert_eq!(second.order_id, earlier_same_price.order_id);

        skip.insert(earlier_same_price.order_id);
        let third = book.next_candidate(Fils::new(4_000), &skip).unwrap();
        assert_eq!(third.order_id, later_same_price.order_id);
    }

    #[test]
    fn test_bid_book_candidate_respects_limit() {
        let mut book = BidBook::new();
        book.insert(&bid(4_900, 10, TS));

        let skip = HashSet::new();
        // A sell limited at 5_000 does not cross a 4_900 bid
        assert!(book.next_candidate(Fils::new(5_000), &skip).is_none());
        assert!(book.next_candidate(Fils::new(4_900), &skip).is_some());
    }

    #[test]
    fn test_bid_book_depth_snapshot() {
        let mut book = BidBook::new();
        book.insert(&bid(5_000, 10, TS));
        book.insert(&bid(5_100, 20, TS + 1));
        book.insert(&bid(4_900, 15, TS + 2));
        book.insert(&bid(5_200, 5, TS + 3));

        let depth = book.depth_snapshot(2);
        assert_eq!(depth.len(), 2);
        assert_eq!(depth[0], (Fils::new(5_200), 5));
        assert_eq!(depth[1], (Fils::new(5_100), 20));
    }

    #[test]
    fn test_bid_book_reduce() {
        let mut book = BidBook::new();
        let order = bid(5_000, 30, TS);
        book.insert(&order);

        assert_eq!(book.reduce(&order.order_id, order.price, 10), Some(20));
        assert_eq!(book.reduce(&order.order_id, order.price, 20), Some(0));
        assert!(book.is_empty());
    }
}
