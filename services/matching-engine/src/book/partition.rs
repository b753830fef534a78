//! Book partition for one certificate-selection key
//!
//! A partition owns the open orders for its key plus both book sides.
//! All mutations to a partition happen under one mutex held by the
//! engine, so different keys trade fully in parallel while one key's
//! book stays serialized.

use std::collections::{HashMap, HashSet};
use types::certificate::CertificateKey;
use types::ids::{AccountId, OrderId};
use types::money::Fils;
use types::order::{Order, Side};

use super::ask_book::AskBook;
use super::bid_book::BidBook;

/// Lightweight view of a resting counter-order produced by the
/// candidate cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateRef {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub price: Fils,
    pub remaining: u64,
    pub created_at: i64,
}

/// Order book partition for a single certificate key
#[derive(Debug)]
pub struct Partition {
    pub key: CertificateKey,
    orders: HashMap<OrderId, Order>,
    bids: BidBook,
    asks: AskBook,
}

impl Partition {
    pub fn new(key: CertificateKey) -> Self {
        Self {
            key,
            orders: HashMap::new(),
            bids: BidBook::new(),
            asks: AskBook::new(),
        }
    }

    /// Insert an open order into the partition
    pub fn insert(&mut self, order: Order) {
        match order.side {
            Side::Buy => self.bids.insert(&order),
            Side::Sell => self.asks.insert(&order),
        }
        self.orders.insert(order.order_id, order);
    }

    /// Remove an order from the book and the order table.
    ///
    /// Returns the removed order, or None if it is not resting here.
    pub fn remove(&mut self, order_id: &OrderId) -> Option<Order> {
        let order = self.orders.remove(order_id)?;
        match order.side {
            Side::Buy => self.bids.remove(order_id, order.price),
            Side::Sell => self.asks.remove(order_id, order.price),
        };
        Some(order)
    }

    pub fn order(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    /// Next compatible counter-order for an incoming order, in strict
    /// price-time priority, excluding the skip set.
    pub fn next_candidate(
        &self,
        incoming_side: Side,
        limit: Fils,
        skip: &HashSet<OrderId>,
    ) -> Option<CandidateRef> {
        match incoming_side {
            // A buy matches the cheapest compatible ask
            Side::Buy => self.asks.next_candidate(limit, skip),
            // A sell matches the highest compatible bid
            Side::Sell => self.bids.next_candidate(limit, skip),
        }
    }

    /// Commit a fill against a resting order.
    ///
    /// Decrements the order and its book entry; a fully filled order is
    /// removed and returned so the caller can archive it.
    pub fn apply_fill(&mut self, order_id: &OrderId, quantity: u64, timestamp: i64) -> Option<Order> {
        let order = self.orders.get_mut(order_id)?;
        order.add_fill(quantity, timestamp);
        let price = order.price;
        let side = order.side;
        let filled = order.is_filled();

        match side {
            Side::Buy => self.bids.reduce(order_id, price, quantity),
            Side::Sell => self.asks.reduce(order_id, price, quantity),
        };

        if filled {
            self.orders.remove(order_id)
        } else {
            None
        }
    }

    /// Ids of resting orders whose expiry deadline has passed
    pub fn expired_orders(&self, now: i64) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.is_expired(now))
            .map(|o| o.order_id)
            .collect()
    }

    /// Depth snapshot of both sides, best prices first
    pub fn depth(&self, depth: usize) -> (Vec<(Fils, u64)>, Vec<(Fils, u64)>) {
        (self.bids.depth_snapshot(depth), self.asks.depth_snapshot(depth))
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn open_order_count(&self) -> usize {
        self.orders.len()
    }
}
