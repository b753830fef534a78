//! Per-order escrow bookkeeping
//!
//! Buy orders reserve a per-unit cash commitment that upper-bounds
//! everything one unit can cost at settlement (limit price, buyer fee on
//! it rounded up, one notarization fee). Sell orders reserve units in
//! the specific holding lot backing them. Per-unit accounting makes
//! cancellation release exactly proportional to the unmatched remainder.

use audit::{Actor, AuditRecord, AuditRecorder, EntityType};
use dashmap::DashMap;
use ledger::LedgerStore;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use types::errors::LedgerError;
use types::fee::FeeSchedule;
use types::ids::{AccountId, HoldingId, OrderId};
use types::money::Fils;
use types::order::{Order, Side};

/// Reservation state tracked for one open order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEscrow {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub side: Side,
    /// Cash committed per unit (buy orders; zero for sells)
    pub per_unit: Fils,
    /// Lot the units are reserved in (sell orders)
    pub holding_id: Option<HoldingId>,
    /// Units still covered by the reservation
    pub reserved_units: u64,
}

/// The escrow manager
pub struct EscrowManager {
    ledger: Arc<LedgerStore>,
    fees: FeeSchedule,
    open: DashMap<OrderId, OrderEscrow>,
    audit: Arc<dyn AuditRecorder>,
}

impl EscrowManager {
    pub fn new(ledger: Arc<LedgerStore>, fees: FeeSchedule, audit: Arc<dyn AuditRecorder>) -> Self {
        Self {
            ledger,
            fees,
            open: DashMap::new(),
            audit,
        }
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Reserve funds or inventory for a validated order.
    ///
    /// Called before the order reaches the book; failure here rejects
    /// the order with no side effects.
    pub fn reserve_for_order(&self, order: &Order, timestamp: i64) -> Result<(), LedgerError> {
        let escrow = match order.side {
            Side::Buy => {
                let per_unit = self.fees.buy_reserve_per_unit(order.price);
                let amount = per_unit
                    .checked_mul_quantity(order.quantity)
                    .ok_or(LedgerError::AmountOverflow)?;
                self.ledger.reserve_cash(order.account_id, amount, timestamp)?;
                OrderEscrow {
                    order_id: order.order_id,
                    account_id: order.account_id,
                    side: Side::Buy,
                    per_unit,
                    holding_id: None,
                    reserved_units: order.quantity,
                }
            }
            Side::Sell => {
                let holding_id = order.holding_id.ok_or(LedgerError::HoldingNotFound {
                    holding_id: HoldingId::default(),
                })?;
                self.ledger.reserve_quantity(
                    order.account_id,
                    holding_id,
                    order.quantity,
                    timestamp,
                )?;
                OrderEscrow {
                    order_id: order.order_id,
                    account_id: order.account_id,
                    side: Side::Sell,
                    per_unit: Fils::ZERO,
                    holding_id: Some(holding_id),
                    reserved_units: order.quantity,
                }
            }
        };

        self.audit.record(AuditRecord::new(
            Actor::Account(order.account_id),
            "EscrowReserved",
            EntityType::Order,
            order.order_id.to_string(),
            serde_json::Value::Null,
            escrow_snapshot(&escrow),
            timestamp,
        ));
        debug!(order = %order.order_id, side = ?order.side, units = order.quantity, "escrow reserved");

        self.open.insert(order.order_id, escrow);
        Ok(())
    }

    /// Reservation state for an open order
    pub fn escrow_for(&self, order_id: &OrderId) -> Option<OrderEscrow> {
        self.open.get(order_id).map(|entry| entry.value().clone())
    }

    /// Record that `units` of an order's reservation were consumed by a
    /// settled fill. The ledger movement itself happens inside the
    /// settlement step; this only maintains the commitment bookkeeping.
    pub fn consume(&self, order_id: &OrderId, units: u64, timestamp: i64) {
        let fully_consumed = {
            let Some(mut entry) = self.open.get_mut(order_id) else {
                return;
            };
            let escrow = entry.value_mut();
            let before = escrow_snapshot(escrow);
            escrow.reserved_units = escrow.reserved_units.saturating_sub(units);

            self.audit.record(AuditRecord::new(
                Actor::Account(escrow.account_id),
                "EscrowConsumed",
                EntityType::Order,
                order_id.to_string(),
                before,
                escrow_snapshot(escrow),
                timestamp,
            ));
            escrow.reserved_units == 0
        };

        if fully_consumed {
            self.open.remove(order_id);
        }
    }

    /// Release exactly the reservation covering an order's unmatched
    /// remainder. Called on cancellation or expiry; the portion already
    /// matched is untouched.
    pub fn release_remainder(&self, order: &Order, timestamp: i64) -> Result<(), LedgerError> {
        let Some((_, escrow)) = self.open.remove(&order.order_id) else {
            // Reservation already fully consumed by fills
            return Ok(());
        };

        let remaining = order.remaining_quantity.min(escrow.reserved_units);
        if remaining > 0 {
            match escrow.side {
                Side::Buy => {
                    let amount = escrow
                        .per_unit
                        .checked_mul_quantity(remaining)
                        .ok_or(LedgerError::AmountOverflow)?;
                    self.ledger.release_cash(escrow.account_id, amount, timestamp)?;
                }
                Side::Sell => {
                    if let Some(holding_id) = escrow.holding_id {
                        self.ledger.release_quantity(
                            escrow.account_id,
                            holding_id,
                            remaining,
                            timestamp,
                        )?;
                    }
                }
            }
        }

        self.audit.record(AuditRecord::new(
            Actor::Account(escrow.account_id),
            "EscrowReleased",
            EntityType::Order,
            order.order_id.to_string(),
            escrow_snapshot(&escrow),
            serde_json::Value::Null,
            timestamp,
        ));
        debug!(order = %order.order_id, units = remaining, "escrow released");
        Ok(())
    }

    /// Sum of all outstanding buy-side cash commitments.
    ///
    /// Always equals the ledger's total reserved cash when the engine is
    /// quiescent; the invariant tests lean on this.
    pub fn total_cash_commitment(&self) -> Fils {
        self.open
            .iter()
            .filter(|entry| entry.value().side == Side::Buy)
            .map(|entry| {
                entry
                    .value()
                    .per_unit
                    .checked_mul_quantity(entry.value().reserved_units)
                    .unwrap_or(Fils::ZERO)
            })
            .sum()
    }

    /// Sum of all outstanding sell-side unit commitments
    pub fn total_unit_commitment(&self) -> u64 {
        self.open
            .iter()
            .filter(|entry| entry.value().side == Side::Sell)
            .map(|entry| entry.value().reserved_units)
            .sum()
    }
}

fn escrow_snapshot(escrow: &OrderEscrow) -> serde_json::Value {
    json!({
        "side": format!("{:?}", escrow.side),
        "per_unit": escrow.per_unit,
        "reserved_units": escrow.reserved_units,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit::MemoryRecorder;
    use types::certificate::{CertificateKey, CertificationStandard, Emirate, EnergyType};
    use types::ids::FacilityId;

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

    fn setup() -> (Arc<LedgerStore>, EscrowManager) {
        let recorder = Arc::new(MemoryRecorder::new());
        let ledger = Arc::new(LedgerStore::new(recorder.clone()));
        let manager = EscrowManager::new(ledger.clone(), FeeSchedule::default(), recorder);
        (ledger, manager)
    }

    fn buy_order(account: AccountId, price: i64, quantity: u64) -> Order {
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
            TS,
        )
    }

    fn sell_order(account: AccountId, holding_id: HoldingId, price: i64, quantity: u64) -> Order {
        Order::new(
            account,
            Side::Sell,
            key(),
            Some(holding_id),
            Fils::new(price),
            quantity,
            true,
            None,
            None,
            TS,
        )
    }

    #[test]
    fn test_buy_reservation_amount() {
        let (ledger, manager) = setup();
        let account = AccountId::new();
        ledger.open_account(account, TS).unwrap();
        ledger.deposit_cash(account, Fils::new(1_000_000), TS).unwrap();

        let order = buy_order(account, 5_000, 100);
        manager.reserve_for_order(&order, TS).unwrap();

        // per unit: 5000 + ceil(12.5) + 100 = 5113
        let balances = ledger.balances(account).unwrap();
        assert_eq!(balances.reserved_cash, Fils::new(511_300));
        assert_eq!(manager.total_cash_commitment(), Fils::new(511_300));
    }

    #[test]
    fn test_buy_reservation_insufficient_funds_no_side_effects() {
        let (ledger, manager) = setup();
        let account = AccountId::new();
        ledger.open_account(account, TS).unwrap();
        ledger.deposit_cash(account, Fils::new(1_000), TS).unwrap();

        let order = buy_order(account, 5_000, 100);
        let err = manager.reserve_for_order(&order, TS).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        assert_eq!(ledger.balances(account).unwrap().reserved_cash, Fils::ZERO);
        assert!(manager.escrow_for(&order.order_id).is_none());
    }

    #[test]
    fn test_sell_reservation_locks_lot_units() {
        let (ledger, manager) = setup();
        let account = AccountId::new();
        ledger.open_account(account, TS).unwrap();
        let holding_id = ledger
            .deposit_certificates(account, &key(), 80, Fils::new(4_500), TS)
            .unwrap();

        let order = sell_order(account, holding_id, 5_000, 50);
        manager.reserve_for_order(&order, TS).unwrap();

        let lot = ledger.holding(account, holding_id).unwrap();
        assert_eq!(lot.reserved_quantity, 50);
        assert_eq!(manager.total_unit_commitment(), 50);
    }

    #[test]
    fn test_release_remainder_is_proportional() {
        let (ledger, manager) = setup();
        let account = AccountId::new();
        ledger.open_account(account, TS).unwrap();
        ledger.deposit_cash(account, Fils::new(1_000_000), TS).unwrap();

        let mut order = buy_order(account, 5_000, 100);
        manager.reserve_for_order(&order, TS).unwrap();

        // 70 units settle; their escrow movement happens in the ledger
        // settlement step, so mirror only the bookkeeping here
        manager.consume(&order.order_id, 70, TS + 1);
        order.add_fill(70, TS + 1);
        let consumed = Fils::new(5_113).checked_mul_quantity(70).unwrap();
        ledger.release_cash(account, consumed, TS + 1).unwrap(); // stand-in for the settlement debit

        // Cancelling releases exactly 30 × per_unit
        order.cancel(types::order::CancelReason::UserRequested, TS + 2);
        manager.release_remainder(&order, TS + 2).unwrap();

        let balances = ledger.balances(account).unwrap();
        assert_eq!(balances.reserved_cash, Fils::ZERO);
        assert_eq!(manager.total_cash_commitment(), Fils::ZERO);
    }

    #[test]
    fn test_release_after_full_consumption_is_noop() {
        let (ledger, manager) = setup();
        let account = AccountId::new();
        ledger.open_account(account, TS).unwrap();
        ledger.deposit_cash(account, Fils::new(1_000_000), TS).unwrap();

        let mut order = buy_order(account, 5_000, 10);
        manager.reserve_for_order(&order, TS).unwrap();
        manager.consume(&order.order_id, 10, TS + 1);
        order.add_fill(10, TS + 1);

        assert!(manager.escrow_for(&order.order_id).is_none());
        // Fully filled orders have nothing left to release
        let reserved_before = ledger.balances(account).unwrap().reserved_cash;
        manager.release_remainder(&order, TS + 2).unwrap();
        assert_eq!(
            ledger.balances(account).unwrap().reserved_cash,
            reserved_before
        );
    }

    #[test]
    fn test_commitment_matches_ledger_reservation() {
        let (ledger, manager) = setup();
        let a = AccountId::new();
        let b = AccountId::new();
        for id in [a, b] {
            ledger.open_account(id, TS).unwrap();
            ledger.deposit_cash(id, Fils::new(10_000_000), TS).unwrap();
        }

        manager.reserve_for_order(&buy_order(a, 5_000, 100), TS).unwrap();
        manager.reserve_for_order(&buy_order(b, 4_800, 40), TS).unwrap();
        manager.reserve_for_order(&buy_order(a, 5_200, 10), TS).unwrap();

        assert_eq!(manager.total_cash_commitment(), ledger.total_reserved_cash());
    }
}
