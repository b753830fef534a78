//! Account and balance types
//!
//! An account holds a cash balance (fils), the portion of it reserved
//! against open buy orders, and certificate holding lots. Balances are
//! mutated only through the ledger store, which serializes access per
//! account; the mutators here assert the balance invariants on every
//! transition.

use crate::certificate::{CertificateKey, Holding};
use crate::ids::{AccountId, HoldingId};
use crate::money::Fils;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-account balance and inventory state.
///
/// Invariants: `0 ≤ reserved_cash ≤ cash_balance`, and every holding
/// satisfies `reserved_quantity ≤ quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub cash_balance: Fils,
    pub reserved_cash: Fils,
    pub holdings: HashMap<HoldingId, Holding>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: u64,
}

impl Account {
    /// Create a new empty account for a verified identity
    pub fn new(account_id: AccountId, timestamp: i64) -> Self {
        Self {
            account_id,
            cash_balance: Fils::ZERO,
            reserved_cash: Fils::ZERO,
            holdings: HashMap::new(),
            created_at: timestamp,
            updated_at: timestamp,
            version: 0,
        }
    }

    /// Cash not reserved against open buy orders
    pub fn available_cash(&self) -> Fils {
        self.cash_balance - self.reserved_cash
    }

    /// Check the account invariants
    pub fn check_invariant(&self) -> bool {
        !self.reserved_cash.raw().is_negative()
            && self.reserved_cash <= self.cash_balance
            && self.holdings.values().all(|h| h.check_invariant())
    }

    pub fn holding(&self, holding_id: &HoldingId) -> Option<&Holding> {
        self.holdings.get(holding_id)
    }

    pub fn holding_mut(&mut self, holding_id: &HoldingId) -> Option<&mut Holding> {
        self.holdings.get_mut(holding_id)
    }

    /// Credit cash (deposit or trade proceeds)
    ///
    /// # Panics
    /// Panics if the amount is negative
    pub fn credit_cash(&mut self, amount: Fils, timestamp: i64) {
        assert!(!amount.raw().is_negative(), "Credit must be non-negative");

        self.cash_balance += amount;
        self.touch(timestamp);

        assert!(self.check_invariant(), "Invariant violated after credit");
    }

    /// Earmark available cash against an open buy order
    ///
    /// # Panics
    /// Panics if the amount exceeds available cash
    pub fn reserve_cash(&mut self, amount: Fils, timestamp: i64) {
        assert!(!amount.raw().is_negative(), "Reserve must be non-negative");
        assert!(amount <= self.available_cash(), "Insufficient available cash");

        self.reserved_cash += amount;
        self.touch(timestamp);

        assert!(self.check_invariant(), "Invariant violated after reserve");
    }

    /// Return reserved cash to the available balance
    ///
    /// # Panics
    /// Panics if the amount exceeds reserved cash
    pub fn release_cash(&mut self, amount: Fils, timestamp: i64) {
        assert!(!amount.raw().is_negative(), "Release must be non-negative");
        assert!(amount <= self.reserved_cash, "Insufficient reserved cash");

        self.reserved_cash -= amount;
        self.touch(timestamp);

        assert!(self.check_invariant(), "Invariant violated after release");
    }

    /// Consume reserved cash (buy-side settlement debit)
    ///
    /// # Panics
    /// Panics if the amount exceeds reserved cash
    pub fn debit_reserved_cash(&mut self, amount: Fils, timestamp: i64) {
        assert!(!amount.raw().is_negative(), "Debit must be non-negative");
        assert!(amount <= self.reserved_cash, "Insufficient reserved cash");

        self.reserved_cash -= amount;
        self.cash_balance -= amount;
        self.touch(timestamp);

        assert!(self.check_invariant(), "Invariant violated after debit");
    }

    /// Add certificates, merging into an existing active lot when key
    /// and acquisition price both match, else creating a new lot.
    ///
    /// Returns the id of the lot that received the units.
    pub fn credit_certificates(
        &mut self,
        key: &CertificateKey,
        quantity: u64,
        acquisition_price: Fils,
        timestamp: i64,
    ) -> HoldingId {
        let existing = self.holdings.values_mut().find(|h| {
            !h.is_retired()
                && h.is_tradable()
                && h.key == *key
                && h.acquisition_price == acquisition_price
        });

        let holding_id = match existing {
            Some(holding) => {
                holding.credit(quantity);
                holding.holding_id
            }
            None => {
                let holding = Holding::new(
                    self.account_id,
                    key.clone(),
                    quantity,
                    acquisition_price,
                    timestamp,
                );
                let holding_id = holding.holding_id;
                self.holdings.insert(holding_id, holding);
                holding_id
            }
        };

        self.touch(timestamp);
        holding_id
    }

    pub fn touch(&mut self, timestamp: i64) {
        self.updated_at = timestamp;
        self.version += 1;
    }
}

/// Read-only balance view returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancesSnapshot {
    pub account_id: AccountId,
    pub cash_balance: Fils,
    pub reserved_cash: Fils,
    pub available_cash: Fils,
    pub holdings: Vec<Holding>,
}

impl BalancesSnapshot {
    pub fn of(account: &Account) -> Self {
        let mut holdings: Vec<Holding> = account.holdings.values().cloned().collect();
        holdings.sort_by_key(|h| h.acquired_at);
        Self {
            account_id: account.account_id,
            cash_balance: account.cash_balance,
            reserved_cash: account.reserved_cash,
            available_cash: account.available_cash(),
            holdings,
        }
    }
}
