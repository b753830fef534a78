//! Account store with per-account serialization
//!
//! Every account lives behind its own mutex, so all mutations to one
//! account's balances are linearized. The cross-account settlement step
//! acquires both account locks in ascending `AccountId` order, which
//! makes deadlock impossible, and uses `try_lock` so contention surfaces
//! as `ConcurrentModification` for the settlement layer to retry instead
//! of blocking a worker.

use audit::{Actor, AuditRecord, AuditRecorder, EntityType};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use types::account::{Account, BalancesSnapshot};
use types::certificate::{CertificateKey, Holding};
use types::errors::LedgerError;
use types::ids::{AccountId, HoldingId, TransactionId};
use types::money::{total_amount, Fils};

/// Amounts applied by one atomic settlement step.
///
/// The escrow debit is the buyer's full cost for the fill
/// (`total + buyer_fee + notarization_fee`); the escrow release is the
/// surplus of the per-unit reservation over that cost, returned to the
/// buyer's available balance in the same step.
#[derive(Debug, Clone)]
pub struct SettlementTerms {
    pub transaction_id: TransactionId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub holding_id: HoldingId,
    pub key: CertificateKey,
    pub quantity: u64,
    pub price_per_unit: Fils,
    pub buyer_fee: Fils,
    pub seller_fee: Fils,
    pub notarization_fee: Fils,
    pub escrow_debit: Fils,
    pub escrow_release: Fils,
    pub timestamp: i64,
}

impl SettlementTerms {
    fn total(&self) -> Result<Fils, LedgerError> {
        total_amount(self.price_per_unit, self.quantity).ok_or(LedgerError::AmountOverflow)
    }
}

/// The ledger store
pub struct LedgerStore {
    accounts: DashMap<AccountId, Arc<Mutex<Account>>>,
    collected_fees: Mutex<Fils>,
    audit: Arc<dyn AuditRecorder>,
}

impl LedgerStore {
    pub fn new(audit: Arc<dyn AuditRecorder>) -> Self {
        Self {
            accounts: DashMap::new(),
            collected_fees: Mutex::new(Fils::ZERO),
            audit,
        }
    }

    /// Register an account for a verified identity
    pub fn open_account(&self, account_id: AccountId, timestamp: i64) -> Result<(), LedgerError> {
        if self.accounts.contains_key(&account_id) {
            return Err(LedgerError::AccountExists { account_id });
        }
        self.accounts
            .insert(account_id, Arc::new(Mutex::new(Account::new(account_id, timestamp))));

        self.audit.record(AuditRecord::new(
            Actor::Account(account_id),
            "AccountOpened",
            EntityType::Account,
            account_id.to_string(),
            Value::Null,
            json!({ "cash_balance": 0, "reserved_cash": 0 }),
            timestamp,
        ));
        Ok(())
    }

    fn account(&self, account_id: AccountId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.accounts
            .get(&account_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::AccountNotFound { account_id })
    }

    /// Credit cash from an external on-ramp
    pub fn deposit_cash(
        &self,
        account_id: AccountId,
        amount: Fils,
        timestamp: i64,
    ) -> Result<Fils, LedgerError> {
        let arc = self.account(account_id)?;
        let mut account = arc.lock();

        let before = cash_snapshot(&account);
        account.credit_cash(amount, timestamp);
        let balance = account.cash_balance;
        self.audit_cash(&account, "CashDeposited", before, timestamp);

        Ok(balance)
    }

    /// Credit certificates acquired off-platform, creating or extending
    /// a holding lot. Returns the receiving lot's id.
    pub fn deposit_certificates(
        &self,
        account_id: AccountId,
        key: &CertificateKey,
        quantity: u64,
        acquisition_price: Fils,
        timestamp: i64,
    ) -> Result<HoldingId, LedgerError> {
        let arc = self.account(account_id)?;
        let mut account = arc.lock();

        let holding_id = account.credit_certificates(key, quantity, acquisition_price, timestamp);
        let holding = account
            .holding(&holding_id)
            .cloned()
            .ok_or(LedgerError::HoldingNotFound { holding_id })?;

        self.audit.record(AuditRecord::new(
            Actor::Account(account_id),
            "CertificatesDeposited",
            EntityType::Holding,
            holding_id.to_string(),
            Value::Null,
            snapshot(&holding),
            timestamp,
        ));

        Ok(holding_id)
    }

    /// Earmark cash against an open buy order
    pub fn reserve_cash(
        &self,
        account_id: AccountId,
        amount: Fils,
        timestamp: i64,
    ) -> Result<(), LedgerError> {
        let arc = self.account(account_id)?;
        let mut account = arc.lock();

        if amount > account.available_cash() {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: account.available_cash(),
            });
        }

        let before = cash_snapshot(&account);
        account.reserve_cash(amount, timestamp);
        self.audit_cash(&account, "CashReserved", before, timestamp);

        debug!(account = %account_id, %amount, "cash reserved");
        Ok(())
    }

    /// Return reserved cash to the available balance
    pub fn release_cash(
        &self,
        account_id: AccountId,
        amount: Fils,
        timestamp: i64,
    ) -> Result<(), LedgerError> {
        let arc = self.account(account_id)?;
        let mut account = arc.lock();

        if amount > account.reserved_cash {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: account.reserved_cash,
            });
        }

        let before = cash_snapshot(&account);
        account.release_cash(amount, timestamp);
        self.audit_cash(&account, "CashReleased", before, timestamp);

        debug!(account = %account_id, %amount, "cash released");
        Ok(())
    }

    /// Earmark certificate units against an open sell order
    pub fn reserve_quantity(
        &self,
        account_id: AccountId,
        holding_id: HoldingId,
        units: u64,
        timestamp: i64,
    ) -> Result<(), LedgerError> {
        let arc = self.account(account_id)?;
        let mut account = arc.lock();

        let holding = account
            .holding_mut(&holding_id)
            .ok_or(LedgerError::HoldingNotFound { holding_id })?;
        if !holding.is_tradable() {
            return Err(LedgerError::HoldingNotTradable { holding_id });
        }
        if units > holding.available() {
            return Err(LedgerError::InsufficientInventory {
                holding_id,
                requested: units,
                available: holding.available(),
            });
        }

        let before = snapshot(holding);
        holding.reserve(units);
        let after = snapshot(holding);
        account.touch(timestamp);
        self.audit_holding(account_id, holding_id, "QuantityReserved", before, after, timestamp);

        debug!(account = %account_id, holding = %holding_id, units, "quantity reserved");
        Ok(())
    }

    /// Return reserved certificate units to the available inventory
    pub fn release_quantity(
        &self,
        account_id: AccountId,
        holding_id: HoldingId,
        units: u64,
        timestamp: i64,
    ) -> Result<(), LedgerError> {
        let arc = self.account(account_id)?;
        let mut account = arc.lock();

        let holding = account
            .holding_mut(&holding_id)
            .ok_or(LedgerError::HoldingNotFound { holding_id })?;
        if units > holding.reserved_quantity {
            return Err(LedgerError::InsufficientInventory {
                holding_id,
                requested: units,
                available: holding.reserved_quantity,
            });
        }

        let before = snapshot(holding);
        holding.release(units);
        let after = snapshot(holding);
        account.touch(timestamp);
        self.audit_holding(account_id, holding_id, "QuantityReleased", before, after, timestamp);

        debug!(account = %account_id, holding = %holding_id, units, "quantity released");
        Ok(())
    }

    /// Apply one settlement as a single atomic step across both parties.
    ///
    /// All precondition checks run before the first mutation, so a
    /// failed settlement applies nothing. Contention on either account
    /// lock returns `ConcurrentModification` without touching state.
    pub fn settle_trade(&self, terms: &SettlementTerms) -> Result<(), LedgerError> {
        if terms.buyer == terms.seller {
            return Err(LedgerError::SelfTransfer);
        }
        let total = terms.total()?;
        let seller_proceeds = total
            .checked_sub(terms.seller_fee)
            .filter(|p| !p.raw().is_negative())
            .ok_or(LedgerError::AmountOverflow)?;
        let reserved_portion = terms
            .escrow_debit
            .checked_add(terms.escrow_release)
            .ok_or(LedgerError::AmountOverflow)?;

        let buyer_arc = self.account(terms.buyer)?;
        let seller_arc = self.account(terms.seller)?;

        // Ascending-id acquisition order; try_lock keeps settlement
        // workers from blocking on a contended account.
        let (mut first, mut second) = if terms.buyer < terms.seller {
            (try_lock(&buyer_arc)?, try_lock(&seller_arc)?)
        } else {
            (try_lock(&seller_arc)?, try_lock(&buyer_arc)?)
        };
        let (buyer, seller) = if terms.buyer < terms.seller {
            (&mut *first, &mut *second)
        } else {
            (&mut *second, &mut *first)
        };

        // Preconditions, checked before any mutation
        if reserved_portion > buyer.reserved_cash {
            return Err(LedgerError::InsufficientFunds {
                required: reserved_portion,
                available: buyer.reserved_cash,
            });
        }
        {
            let holding = seller
                .holding(&terms.holding_id)
                .ok_or(LedgerError::HoldingNotFound {
                    holding_id: terms.holding_id,
                })?;
            if !holding.is_tradable() {
                return Err(LedgerError::HoldingNotTradable {
                    holding_id: terms.holding_id,
                });
            }
            if terms.quantity > holding.reserved_quantity {
                return Err(LedgerError::InsufficientInventory {
                    holding_id: terms.holding_id,
                    requested: terms.quantity,
                    available: holding.reserved_quantity,
                });
            }
        }

        let buyer_before = cash_snapshot(buyer);
        let seller_before = cash_snapshot(seller);

        // Buyer: consume the fill's escrow, release the surplus
        buyer.debit_reserved_cash(terms.escrow_debit, terms.timestamp);
        buyer.release_cash(terms.escrow_release, terms.timestamp);
        buyer.credit_certificates(
            &terms.key,
            terms.quantity,
            terms.price_per_unit,
            terms.timestamp,
        );

        // Seller: hand over the reserved units, receive net proceeds
        let seller_holding = seller
            .holding_mut(&terms.holding_id)
            .ok_or(LedgerError::HoldingNotFound {
                holding_id: terms.holding_id,
            })?;
        seller_holding.debit_reserved(terms.quantity);
        seller.credit_cash(seller_proceeds, terms.timestamp);

        // Platform collects the fees
        *self.collected_fees.lock() +=
            terms.buyer_fee + terms.seller_fee + terms.notarization_fee;

        self.audit.record(AuditRecord::new(
            Actor::Account(terms.buyer),
            "TradeSettled",
            EntityType::Account,
            terms.buyer.to_string(),
            buyer_before,
            cash_snapshot(buyer),
            terms.timestamp,
        ));
        self.audit.record(AuditRecord::new(
            Actor::Account(terms.seller),
            "TradeSettled",
            EntityType::Account,
            terms.seller.to_string(),
            seller_before,
            cash_snapshot(seller),
            terms.timestamp,
        ));

        debug!(
            transaction = %terms.transaction_id,
            buyer = %terms.buyer,
            seller = %terms.seller,
            quantity = terms.quantity,
            "trade settled"
        );
        Ok(())
    }

    /// Balance view for one account
    pub fn balances(&self, account_id: AccountId) -> Result<BalancesSnapshot, LedgerError> {
        let arc = self.account(account_id)?;
        let account = arc.lock();
        Ok(BalancesSnapshot::of(&account))
    }

    /// A specific holding lot
    pub fn holding(
        &self,
        account_id: AccountId,
        holding_id: HoldingId,
    ) -> Result<Holding, LedgerError> {
        let arc = self.account(account_id)?;
        let account = arc.lock();
        account
            .holding(&holding_id)
            .cloned()
            .ok_or(LedgerError::HoldingNotFound { holding_id })
    }

    /// Sum of all accounts' cash balances
    pub fn total_cash(&self) -> Fils {
        self.accounts
            .iter()
            .map(|entry| entry.value().lock().cash_balance)
            .sum()
    }

    /// Sum of all accounts' reserved cash
    pub fn total_reserved_cash(&self) -> Fils {
        self.accounts
            .iter()
            .map(|entry| entry.value().lock().reserved_cash)
            .sum()
    }

    /// Sum of all accounts' reserved certificate units
    pub fn total_reserved_quantity(&self) -> u64 {
        self.accounts
            .iter()
            .map(|entry| {
                entry
                    .value()
                    .lock()
                    .holdings
                    .values()
                    .map(|h| h.reserved_quantity)
                    .sum::<u64>()
            })
            .sum()
    }

    /// Fees the platform has collected across all settlements
    pub fn collected_fees(&self) -> Fils {
        *self.collected_fees.lock()
    }

    /// Check every account's balance invariants
    pub fn check_invariants(&self) -> bool {
        self.accounts
            .iter()
            .all(|entry| entry.value().lock().check_invariant())
    }

    fn audit_cash(&self, account: &Account, action: &str, before: Value, timestamp: i64) {
        self.audit.record(AuditRecord::new(
            Actor::Account(account.account_id),
            action,
            EntityType::Account,
            account.account_id.to_string(),
            before,
            cash_snapshot(account),
            timestamp,
        ));
    }

    fn audit_holding(
        &self,
        account_id: AccountId,
        holding_id: HoldingId,
        action: &str,
        before: Value,
        after: Value,
        timestamp: i64,
    ) {
        self.audit.record(AuditRecord::new(
            Actor::Account(account_id),
            action,
            EntityType::Holding,
            holding_id.to_string(),
            before,
            after,
            timestamp,
        ));
    }
}

fn try_lock(arc: &Arc<Mutex<Account>>) -> Result<MutexGuard<'_, Account>, LedgerError> {
    arc.try_lock().ok_or(LedgerError::ConcurrentModification)
}

fn cash_snapshot(account: &Account) -> Value {
    json!({
        "cash_balance": account.cash_balance,
        "reserved_cash": account.reserved_cash,
        "version": account.version,
    })
}

fn snapshot(holding: &Holding) -> Value {
    serde_json::to_value(holding).unwrap_or(Value::Null)
}
