//! Settlement of match events
//!
//! One match event becomes one Transaction, exactly once. The ledger
//! transfer is a single atomic step under both account locks; contention
//! is retried transparently up to a bounded count before surfacing as
//! retry exhaustion, and any failure before the transfer applies leaves
//! every reservation and order remainder untouched.

use audit::{Actor, AuditRecord, AuditRecorder, EntityType};
use escrow::EscrowManager;
use ledger::{LedgerStore, SettlementTerms};
use matching_engine::engine::SettlementHandler;
use matching_engine::events::MatchEvent;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use types::errors::{LedgerError, SettlementError};
use types::ids::TransactionId;
use types::money::total_amount;
use types::transaction::Transaction;

use crate::notarization::NotaryQueue;
use crate::store::TransactionStore;

/// Settlement processor configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Retries on account-lock contention before giving up
    pub max_retries: u32,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// The settlement processor
pub struct SettlementProcessor {
    ledger: Arc<LedgerStore>,
    escrow: Arc<EscrowManager>,
    store: Arc<TransactionStore>,
    notary: NotaryQueue,
    audit: Arc<dyn AuditRecorder>,
    config: SettlementConfig,
}

impl SettlementProcessor {
    pub fn new(
        ledger: Arc<LedgerStore>,
        escrow: Arc<EscrowManager>,
        store: Arc<TransactionStore>,
        notary: NotaryQueue,
        audit: Arc<dyn AuditRecorder>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            escrow,
            store,
            notary,
            audit,
            config,
        }
    }

    pub fn transactions(&self) -> &Arc<TransactionStore> {
        &self.store
    }

    fn apply(&self, event: &MatchEvent) -> Result<TransactionId, SettlementError> {
        let fees = self.escrow.fees();

        let total = total_amount(event.clearing_price, event.quantity)
            .ok_or(SettlementError::Ledger(LedgerError::AmountOverflow))?;
        let buyer_fee = fees.buyer_fee(total);
        let seller_fee = fees.seller_fee(total);
        let notarization_fee = fees.notarization_fee;

        // Convert the buy-side per-unit reservation into the settlement
        // debit plus a surplus release, never an outright release
        let buy_escrow = self
            .escrow
            .escrow_for(&event.buy_order_id)
            .ok_or(SettlementError::EscrowMissing {
                order_id: event.buy_order_id,
            })?;
        let reserved_portion = buy_escrow
            .per_unit
            .checked_mul_quantity(event.quantity)
            .ok_or(SettlementError::Ledger(LedgerError::AmountOverflow))?;
        let escrow_debit = total
            .checked_add(buyer_fee)
            .and_then(|v| v.checked_add(notarization_fee))
            .ok_or(SettlementError::Ledger(LedgerError::AmountOverflow))?;
        let escrow_release = reserved_portion
            .checked_sub(escrow_debit)
            .filter(|v| !v.raw().is_negative())
            .ok_or(SettlementError::Ledger(LedgerError::AmountOverflow))?;

        let mut transaction = Transaction::new(
            event.match_id,
            event.buyer_account_id,
            event.seller_account_id,
            event.buy_order_id,
            event.sell_order_id,
            event.holding_id,
            event.key.clone(),
            event.quantity,
            event.clearing_price,
            total,
            buyer_fee,
            seller_fee,
            notarization_fee,
            event.matched_at,
        );

        let terms = SettlementTerms {
            transaction_id: transaction.transaction_id,
            buyer: event.buyer_account_id,
            seller: event.seller_account_id,
            holding_id: event.holding_id,
            key: event.key.clone(),
            quantity: event.quantity,
            price_per_unit: event.clearing_price,
            buyer_fee,
            seller_fee,
            notarization_fee,
            escrow_debit,
            escrow_release,
            timestamp: event.matched_at,
        };

        // Bounded transparent retry on account-lock contention
        let mut attempts = 0;
        loop {
            match self.ledger.settle_trade(&terms) {
                Ok(()) => break,
                Err(LedgerError::ConcurrentModification) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        warn!(match_id = %event.match_id, attempts, "settlement retries exhausted");
                        return Err(SettlementError::RetryExhausted { attempts });
                    }
                    std::thread::yield_now();
                }
                Err(err) => return Err(SettlementError::Ledger(err)),
            }
        }

        // The transfer is applied; the trade is economically final
        transaction.complete();
        self.escrow.consume(&event.buy_order_id, event.quantity, event.matched_at);
        self.escrow.consume(&event.sell_order_id, event.quantity, event.matched_at);

        let transaction_id = transaction.transaction_id;
        self.audit.record(AuditRecord::new(
            Actor::System,
            "TransactionCreated",
            EntityType::Transaction,
            transaction_id.to_string(),
            Value::Null,
            serde_json::to_value(&transaction).unwrap_or(Value::Null),
            event.matched_at,
        ));
        self.store.insert(transaction);

        // Fire-and-forget; the dispatcher owns retries
        self.notary.enqueue(transaction_id);

        info!(
            %transaction_id,
            match_id = %event.match_id,
            quantity = event.quantity,
            clearing = %event.clearing_price,
            "match settled"
        );
        Ok(transaction_id)
    }
}

impl SettlementHandler for SettlementProcessor {
    /// Settle a match event, exactly once per match id.
    ///
    /// Replaying an already-settled event returns the existing
    /// transaction without touching the ledger.
    fn settle(&self, event: &MatchEvent) -> Result<TransactionId, SettlementError> {
        if let Some(existing) = self.store.id_for_match(&event.match_id) {
            return Ok(existing);
        }
        self.apply(event)
    }
}
