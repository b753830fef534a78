//! Ask (sell-side) order book
//!
//! Maintains sell orders sorted by price ascending (best ask first).
//! Uses BTreeMap for deterministic iteration order.

use std::collections::BTreeMap;
use std::collections::HashSet;
use types::ids::OrderId;
use types::money::Fils;
use types::order::Order;

use super::partition::CandidateRef;
use super::price_level::PriceLevel;

/// Ask (sell) side order book
///
/// Orders are sorted by price ascending, so the lowest ask is first.
/// At each price level, orders are maintained in FIFO order.
#[derive(Debug, Clone, Default)]
pub struct AskBook {
    levels: BTreeMap<Fils, PriceLevel>,
}

impl AskBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order into the ask book
    pub fn insert(&mut self, order: &Order) {
        let level = self.levels.entry(order.price).or_default();
        level.insert(
            order.order_id,
            order.account_id,
            order.remaining_quantity,
            order.created_at,
        );
    }

    /// Remove an order from the ask book
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

    /// Get the best ask (lowest price) and its resting quantity
    pub fn best_ask(&self) -> Option<(Fils, u64)> {
        self.levels
            .iter()
            .next()
            .map(|(price, level)| (*price, level.total_quantity()))
    }

    /// Best-priced, earliest resting ask at or below the limit that is
    /// not in the skip set. Lazy and restartable; see
    /// [`super::BidBook::next_candidate`].
    pub fn next_candidate(&self, limit: Fils, skip: &HashSet<OrderId>) -> Option<CandidateRef> {
        for (price, level) in self.levels.iter() {
            if *price > limit {
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
