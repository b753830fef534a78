//! Matching engine core
//!
//! Walks compatible counter-orders in strict price-time priority and
//! offers each viable fill to the settlement layer before committing it
//! to the book. A fill the settlement layer rejects is never applied:
//! the candidate is skipped and both orders keep their remainders.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::certificate::CertificateKey;
use types::errors::{OrderError, SettlementError};
use types::ids::{AccountId, MatchId, OrderId, TransactionId};
use types::money::Fils;
use types::order::{CancelReason, Order, Side};

use crate::book::Partition;
use crate::events::MatchEvent;

/// Seam to the settlement processor.
///
/// `settle` must be atomic: on `Ok` the ledger transfer has been fully
/// applied, on `Err` nothing has changed anywhere.
pub trait SettlementHandler: Send + Sync {
    fn settle(&self, event: &MatchEvent) -> Result<TransactionId, SettlementError>;
}

/// Outcome of one order submission
#[derive(Debug)]
pub struct SubmissionReport {
    /// Final state of the submitted order
    pub order: Order,
    /// Match events settled during the walk, in execution order
    pub matches: Vec<MatchEvent>,
    /// Transactions created for those matches
    pub transactions: Vec<TransactionId>,
    /// Resting orders found expired during the walk; their reservations
    /// still need to be released by the caller
    pub expired: Vec<Order>,
    /// Settlement rejections encountered during the walk
    pub failures: Vec<SettlementError>,
}

/// Depth view of one partition
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub key: CertificateKey,
    pub bids: Vec<(Fils, u64)>,
    pub asks: Vec<(Fils, u64)>,
}

/// The matching engine
pub struct MatchingEngine {
    partitions: DashMap<CertificateKey, Arc<Mutex<Partition>>>,
    /// Open order id → partition key
    index: DashMap<OrderId, CertificateKey>,
    /// Terminal orders, kept for lookups
    closed: DashMap<OrderId, Order>,
    settler: Arc<dyn SettlementHandler>,
}

impl MatchingEngine {
    pub fn new(settler: Arc<dyn SettlementHandler>) -> Self {
        Self {
            partitions: DashMap::new(),
            index: DashMap::new(),
            closed: DashMap::new(),
            settler,
        }
    }

    fn partition(&self, key: &CertificateKey) -> Arc<Mutex<Partition>> {
        self.partitions
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Partition::new(key.clone()))))
            .clone()
    }

    /// Submit a validated, escrowed order.
    ///
    /// Runs the matching walk under the partition lock, settles viable
    /// fills, and leaves any unfilled remainder resting in the book.
    pub fn submit(&self, mut order: Order, now: i64) -> SubmissionReport {
        let partition_arc = self.partition(&order.key);
        let mut partition = partition_arc.lock();

        let mut skip: HashSet<OrderId> = HashSet::new();
        let mut matches = Vec::new();
        let mut transactions = Vec::new();
        let mut expired = Vec::new();
        let mut failures = Vec::new();

        while order.remaining_quantity > 0 {
            let Some(candidate) = partition.next_candidate(order.side, order.price, &skip) else {
                break;
            };
            let Some(counter) = partition.order(&candidate.order_id).cloned() else {
                skip.insert(candidate.order_id);
                continue;
            };

            // Expired counter-orders are lazily cancelled, never matched
            if counter.is_expired(now) {
                if let Some(mut removed) = partition.remove(&counter.order_id) {
                    removed.expire(now);
                    self.index.remove(&removed.order_id);
                    self.closed.insert(removed.order_id, removed.clone());
                    debug!(order = %removed.order_id, "expired order removed during walk");
                    expired.push(removed);
                }
                continue;
            }

            // Self-trade prevention: never pair an account with itself
            if counter.account_id == order.account_id {
                skip.insert(counter.order_id);
                continue;
            }

            let fill = order.remaining_quantity.min(counter.remaining_quantity);

            // A side that forbids partial fills must be fully satisfied
            // in this one step, else the candidate is skipped
            if !order.allow_partial_fill && fill < order.remaining_quantity {
                skip.insert(counter.order_id);
                continue;
            }
            if !counter.allow_partial_fill && fill < counter.remaining_quantity {
                skip.insert(counter.order_id);
                continue;
            }
            if order.min_fill_quantity.is_some_and(|min| fill < min) {
                skip.insert(counter.order_id);
                continue;
            }
            if counter.min_fill_quantity.is_some_and(|min| fill < min) {
                skip.insert(counter.order_id);
                continue;
            }

            let Some(event) = build_match(&order, &counter, fill, candidate.price, now) else {
                skip.insert(counter.order_id);
                continue;
            };

            match self.settler.settle(&event) {
                Ok(transaction_id) => {
                    order.add_fill(fill, now);
                    if let Some(filled) = partition.apply_fill(&counter.order_id, fill, now) {
                        self.index.remove(&filled.order_id);
                        self.closed.insert(filled.order_id, filled);
                    }
                    debug!(
                        buy = %event.buy_order_id,
                        sell = %event.sell_order_id,
                        quantity = fill,
                        clearing = %event.clearing_price,
                        "match settled"
                    );
                    matches.push(event);
                    transactions.push(transaction_id);
                }
                Err(err) => {
                    warn!(
                        incoming = %order.order_id,
                        counter = %counter.order_id,
                        %err,
                        "settlement rejected match, skipping candidate"
                    );
                    failures.push(err);
                    skip.insert(counter.order_id);
                }
            }
        }

        if order.status.is_terminal() {
            self.closed.insert(order.order_id, order.clone());
        } else {
            self.index.insert(order.order_id, order.key.clone());
            partition.insert(order.clone());
        }

        info!(
            order = %order.order_id,
            side = ?order.side,
            status = ?order.status,
            fills = matches.len(),
            "order processed"
        );

        SubmissionReport {
            order,
            matches,
            transactions,
            expired,
            failures,
        }
    }

    /// Cancel the still-open remainder of an order.
    ///
    /// Any portion already matched stays settled. Returns the cancelled
    /// order so the caller can release its remaining reservation.
    pub fn cancel(
        &self,
        order_id: OrderId,
        account_id: AccountId,
        now: i64,
    ) -> Result<Order, OrderError> {
        let Some(key) = self.index.get(&order_id).map(|entry| entry.value().clone()) else {
            return match self.closed.get(&order_id) {
                Some(order) if order.account_id != account_id => {
                    Err(OrderError::NotOwner { order_id })
                }
                Some(_) => Err(OrderError::AlreadyTerminal { order_id }),
                None => Err(OrderError::NotFound { order_id }),
            };
        };

        let partition_arc = self.partition(&key);
        let mut partition = partition_arc.lock();

        // Re-check under the lock: the order may have filled meanwhile
        match partition.order(&order_id) {
            Some(order) if order.account_id != account_id => {
                return Err(OrderError::NotOwner { order_id });
            }
            Some(_) => {}
            None => return Err(OrderError::AlreadyTerminal { order_id }),
        }

        let Some(mut removed) = partition.remove(&order_id) else {
            return Err(OrderError::AlreadyTerminal { order_id });
        };
        removed.cancel(CancelReason::UserRequested, now);
        self.index.remove(&order_id);
        self.closed.insert(order_id, removed.clone());

        info!(order = %order_id, remaining = removed.remaining_quantity, "order cancelled");
        Ok(removed)
    }

    /// Remove every resting order whose expiry deadline has passed.
    ///
    /// Returns the expired orders so the caller can release their
    /// reservations. Expiry behaves like a cancel of the remainder.
    pub fn sweep_expired(&self, now: i64) -> Vec<Order> {
        let arcs: Vec<Arc<Mutex<Partition>>> = self
            .partitions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut swept = Vec::new();
        for arc in arcs {
            let mut partition = arc.lock();
            for order_id in partition.expired_orders(now) {
                if let Some(mut removed) = partition.remove(&order_id) {
                    removed.expire(now);
                    self.index.remove(&order_id);
                    self.closed.insert(order_id, removed.clone());
                    swept.push(removed);
                }
            }
        }

        if !swept.is_empty() {
            info!(count = swept.len(), "expired orders swept");
        }
        swept
    }

    /// Look up an order, open or terminal
    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        if let Some(order) = self.closed.get(order_id) {
            return Some(order.value().clone());
        }
        let key = self.index.get(order_id).map(|entry| entry.value().clone())?;
        let partition_arc = self.partitions.get(&key).map(|e| Arc::clone(e.value()))?;
        let partition = partition_arc.lock();
        partition.order(order_id).cloned()
    }

    /// Depth snapshot for one certificate key
    pub fn book(&self, key: &CertificateKey, depth: usize) -> BookSnapshot {
        match self.partitions.get(key).map(|e| Arc::clone(e.value())) {
            Some(partition_arc) => {
                let partition = partition_arc.lock();
                let (bids, asks) = partition.depth(depth);
                BookSnapshot {
                    key: key.clone(),
                    bids,
                    asks,
                }
            }
            None => BookSnapshot {
                key: key.clone(),
                bids: Vec::new(),
                asks: Vec::new(),
            },
        }
    }
}

/// Assemble the match event for a fill between the incoming order and a
/// resting counter-order. Returns None if the sell side is missing its
/// holding reference.
fn build_match(
    incoming: &Order,
    counter: &Order,
    quantity: u64,
    clearing_price: Fils,
    now: i64,
) -> Option<MatchEvent> {
    let (buy, sell) = match incoming.side {
        Side::Buy => (incoming, counter),
        Side::Sell => (counter, incoming),
    };
    Some(MatchEvent {
        match_id: MatchId::new(),
        key: incoming.key.clone(),
        buy_order_id: buy.order_id,
        sell_order_id: sell.order_id,
        buyer_account_id: buy.account_id,
        seller_account_id: sell.account_id,
        holding_id: sell.holding_id?,
        quantity,
        clearing_price,
        matched_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::certificate::{CertificationStandard, Emirate, EnergyType};
    use types::ids::{FacilityId, HoldingId};
    use types::order::OrderStatus;

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

    /// Settler stub: settles everything, or rejects everything
    struct StubSettler {
        fail: bool,
        settled: Mutex<Vec<MatchEvent>>,
    }

    impl StubSettler {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                settled: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                settled: Mutex::new(Vec::new()),
            })
        }

        fn settled(&self) -> Vec<MatchEvent> {
            self.settled.lock().clone()
        }
    }

    impl SettlementHandler for StubSettler {
        fn settle(&self, event: &MatchEvent) -> Result<TransactionId, SettlementError> {
            if self.fail {
                return Err(SettlementError::RetryExhausted { attempts: 3 });
            }
            self.settled.lock().push(event.clone());
            Ok(TransactionId::new())
        }
    }

    fn buy(account: AccountId, price: i64, quantity: u64, ts: i64) -> Order {
        Order::new(
            account,
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

    fn sell(account: AccountId, price: i64, quantity: u64, ts: i64) -> Order {
        Order::new(
            account,
            Side::Sell,
            key(),
            Some(HoldingId::new()),
            Fils::new(price),
            quantity,
            true,
            None,
            None,
            ts,
        )
    }

    #[test]
    fn test_resting_order_no_match() {
        let engine = MatchingEngine::new(StubSettler::ok());
        let report = engine.submit(buy(AccountId::new(), 5_000, 10, TS), TS);

        assert!(report.matches.is_empty());
        assert_eq!(report.order.status, OrderStatus::Open);
        assert_eq!(engine.book(&key(), 10).bids.len(), 1);
    }

    #[test]
    fn test_full_match_uses_resting_price() {
        let settler = StubSettler::ok();
        let engine = MatchingEngine::new(settler.clone());

        engine.submit(sell(AccountId::new(), 4_900, 10, TS), TS);
        let report = engine.submit(buy(AccountId::new(), 5_000, 10, TS + 1), TS + 1);

        assert_eq!(report.matches.len(), 1);
        // Maker price wins: clearing at the resting 4_900, not 5_000
        assert_eq!(report.matches[0].clearing_price, Fils::new(4_900));
        assert_eq!(report.order.status, OrderStatus::Filled);
        assert_eq!(settler.settled().len(), 1);

        let book = engine.book(&key(), 10);
        assert!(book.bids.is_empty());
        assert!(book.asks.is_empty());
    }

    #[test]
    fn test_partial_fill_rests_remainder() {
        let engine = MatchingEngine::new(StubSettler::ok());

        let resting = sell(AccountId::new(), 5_000, 60, TS);
        let resting_id = resting.order_id;
        engine.submit(resting, TS);

        let report = engine.submit(buy(AccountId::new(), 5_000, 100, TS + 1), TS + 1);

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].quantity, 60);
        assert_eq!(report.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(report.order.remaining_quantity, 40);

        let filled = engine.order(&resting_id).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);

        // The buy remainder rests in the book
        let book = engine.book(&key(), 10);
        assert_eq!(book.bids, vec![(Fils::new(5_000), 40)]);
    }

    #[test]
    fn test_no_partial_fill_flag_blocks_match() {
        let engine = MatchingEngine::new(StubSettler::ok());

        let resting = sell(AccountId::new(), 5_000, 60, TS);
        let resting_id = resting.order_id;
        engine.submit(resting, TS);

        let mut incoming = buy(AccountId::new(), 5_000, 100, TS + 1);
        incoming.allow_partial_fill = false;
        let report = engine.submit(incoming, TS + 1);

        // 60 < 100 would be a partial fill of the incoming order
        assert!(report.matches.is_empty());
        assert_eq!(report.order.status, OrderStatus::Open);
        assert_eq!(engine.order(&resting_id).unwrap().status, OrderStatus::Open);

        let book = engine.book(&key(), 10);
        assert_eq!(book.bids, vec![(Fils::new(5_000), 100)]);
        assert_eq!(book.asks, vec![(Fils::new(5_000), 60)]);
    }

    #[test]
    fn test_min_fill_quantity_skips_small_fill() {
        let engine = MatchingEngine::new(StubSettler::ok());

        let mut resting = sell(AccountId::new(), 5_000, 60, TS);
        resting.min_fill_quantity = Some(50);
        engine.submit(resting, TS);

        let report = engine.submit(buy(AccountId::new(), 5_000, 40, TS + 1), TS + 1);

        assert!(report.matches.is_empty());
        assert_eq!(report.order.status, OrderStatus::Open);
    }

    #[test]
    fn test_price_time_priority_among_equal_prices() {
        let engine = MatchingEngine::new(StubSettler::ok());

        let first = sell(AccountId::new(), 5_000, 10, TS);
        let second = sell(AccountId::new(), 5_000, 10, TS + 1);
        let first_id = first.order_id;
        let second_id = second.order_id;
        engine.submit(first, TS);
        engine.submit(second, TS + 1);

        let report = engine.submit(buy(AccountId::new(), 5_000, 10, TS + 2), TS + 2);

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].sell_order_id, first_id);
        assert_eq!(engine.order(&second_id).unwrap().status, OrderStatus::Open);
    }

    #[test]
    fn test_better_price_beats_earlier_time() {
        let engine = MatchingEngine::new(StubSettler::ok());

        let earlier_expensive = sell(AccountId::new(), 5_000, 10, TS);
        let later_cheap = sell(AccountId::new(), 4_900, 10, TS + 1);
        let cheap_id = later_cheap.order_id;
        engine.submit(earlier_expensive, TS);
        engine.submit(later_cheap, TS + 1);

        let report = engine.submit(buy(AccountId::new(), 5_000, 10, TS + 2), TS + 2);

        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].sell_order_id, cheap_id);
        assert_eq!(report.matches[0].clearing_price, Fils::new(4_900));
    }

    #[test]
    fn test_walk_continues_across_candidates() {
        let engine = MatchingEngine::new(StubSettler::ok());

        engine.submit(sell(AccountId::new(), 4_900, 60, TS), TS);
        engine.submit(sell(AccountId::new(), 5_000, 60, TS + 1), TS + 1);

        let report = engine.submit(buy(AccountId::new(), 5_000, 100, TS + 2), TS + 2);

        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.matches[0].quantity, 60);
        assert_eq!(report.matches[0].clearing_price, Fils::new(4_900));
        assert_eq!(report.matches[1].quantity, 40);
        assert_eq!(report.matches[1].clearing_price, Fils::new(5_000));
        assert_eq!(report.order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_self_trade_skipped() {
        let engine = MatchingEngine::new(StubSettler::ok());
        let account = AccountId::new();

        engine.submit(sell(account, 5_000, 10, TS), TS);
        let report = engine.submit(buy(account, 5_000, 10, TS + 1), TS + 1);

        assert!(report.matches.is_empty());
        assert_eq!(report.order.status, OrderStatus::Open);

        let book = engine.book(&key(), 10);
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks.len(), 1);
    }

    #[test]
    fn test_expired_candidate_removed_not_matched() {
        let engine = MatchingEngine::new(StubSettler::ok());

        let mut resting = sell(AccountId::new(), 5_000, 10, TS);
        resting.expires_at = Some(TS + 100);
        let resting_id = resting.order_id;
        engine.submit(resting, TS);

        let report = engine.submit(buy(AccountId::new(), 5_000, 10, TS + 200), TS + 200);

        assert!(report.matches.is_empty());
        assert_eq!(report.expired.len(), 1);
        assert_eq!(report.expired[0].order_id, resting_id);
        assert_eq!(
            engine.order(&resting_id).unwrap().status,
            OrderStatus::Expired
        );
        // The incoming order rests with nothing to match
        assert_eq!(report.order.status, OrderStatus::Open);
    }

    #[test]
    fn test_settlement_failure_leaves_orders_untouched() {
        let engine = MatchingEngine::new(StubSettler::failing());

        let resting = sell(AccountId::new(), 5_000, 10, TS);
        let resting_id = resting.order_id;
        engine.submit(resting, TS);

        let report = engine.submit(buy(AccountId::new(), 5_000, 10, TS + 1), TS + 1);

        assert!(report.matches.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.order.remaining_quantity, 10);

        let untouched = engine.order(&resting_id).unwrap();
        assert_eq!(untouched.remaining_quantity, 10);
        assert_eq!(untouched.status, OrderStatus::Open);
    }

    #[test]
    fn test_cancel_open_remainder() {
        let engine = MatchingEngine::new(StubSettler::ok());
        let account = AccountId::new();

        let order = buy(account, 5_000, 100, TS);
        let order_id = order.order_id;
        engine.submit(order, TS);

        let cancelled = engine.cancel(order_id, account, TS + 1).unwrap();
        assert_eq!(
            cancelled.status,
            OrderStatus::Cancelled(CancelReason::UserRequested)
        );
        assert_eq!(cancelled.remaining_quantity, 100);
        assert!(engine.book(&key(), 10).bids.is_empty());

        // Cancelling again reports the terminal state
        assert_eq!(
            engine.cancel(order_id, account, TS + 2),
            Err(OrderError::AlreadyTerminal { order_id })
        );
    }

    #[test]
    fn test_cancel_requires_ownership() {
        let engine = MatchingEngine::new(StubSettler::ok());
        let owner = AccountId::new();

        let order = buy(owner, 5_000, 100, TS);
        let order_id = order.order_id;
        engine.submit(order, TS);

        assert_eq!(
            engine.cancel(order_id, AccountId::new(), TS + 1),
            Err(OrderError::NotOwner { order_id })
        );
    }

    #[test]
    fn test_cancel_unknown_order() {
        let engine = MatchingEngine::new(StubSettler::ok());
        let order_id = OrderId::new();
        assert_eq!(
            engine.cancel(order_id, AccountId::new(), TS),
            Err(OrderError::NotFound { order_id })
        );
    }

    #[test]
    fn test_sweep_expired() {
        let engine = MatchingEngine::new(StubSettler::ok());

        let mut expiring = sell(AccountId::new(), 5_000, 10, TS);
        expiring.expires_at = Some(TS + 100);
        let keeper = sell(AccountId::new(), 5_000, 10, TS);
        let keeper_id = keeper.order_id;
        engine.submit(expiring, TS);
        engine.submit(keeper, TS);

        let swept = engine.sweep_expired(TS + 100);
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].status, OrderStatus::Expired);
        assert_eq!(engine.order(&keeper_id).unwrap().status, OrderStatus::Open);
    }
}
