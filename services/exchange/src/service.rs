//! Exchange service wiring and operations

use audit::AuditRecorder;
use chrono::Utc;
use escrow::EscrowManager;
use ledger::LedgerStore;
use matching_engine::engine::{BookSnapshot, MatchingEngine};
use matching_engine::events::MatchEvent;
use serde::{Deserialize, Serialize};
use settlement::{
    NotarizationDispatcher, NotarizationGateway, NotaryConfig, SettlementConfig,
    SettlementProcessor, TransactionStore,
};
use std::sync::Arc;
use tracing::warn;
use types::account::BalancesSnapshot;
use types::certificate::CertificateKey;
use types::errors::{ExchangeError, SettlementError};
use types::fee::FeeSchedule;
use types::ids::{AccountId, HoldingId, OrderId, TransactionId};
use types::money::Fils;
use types::order::{Order, Side};
use types::transaction::Transaction;

/// Exchange configuration
#[derive(Debug, Clone, Default)]
pub struct ExchangeConfig {
    pub fees: FeeSchedule,
    pub settlement: SettlementConfig,
    pub notary: NotaryConfig,
}

/// Buy order submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyOrderRequest {
    /// Verified by the authentication collaborator upstream
    pub account_id: AccountId,
    pub key: CertificateKey,
    pub quantity: u64,
    pub price: Fils,
    pub allow_partial_fill: bool,
    pub min_fill_quantity: Option<u64>,
    pub expires_at: Option<i64>,
}

/// Sell order submission; the certificate criteria come from the named
/// holding lot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellOrderRequest {
    pub account_id: AccountId,
    pub holding_id: HoldingId,
    pub quantity: u64,
    pub price: Fils,
    pub allow_partial_fill: bool,
    pub min_fill_quantity: Option<u64>,
    pub expires_at: Option<i64>,
}

/// Outcome returned to the submitter
#[derive(Debug)]
pub struct OrderReceipt {
    /// Final state of the order after the matching walk
    pub order: Order,
    /// Match events settled immediately
    pub matches: Vec<MatchEvent>,
    /// Transactions created for those matches
    pub transactions: Vec<TransactionId>,
    /// Settlement rejections encountered during the walk
    pub failures: Vec<SettlementError>,
}

/// The assembled trading core
pub struct Exchange {
    ledger: Arc<LedgerStore>,
    escrow: Arc<EscrowManager>,
    engine: MatchingEngine,
    transactions: Arc<TransactionStore>,
    dispatcher: Option<NotarizationDispatcher>,
}

impl Exchange {
    /// Assemble the service around the external collaborators
    pub fn new(
        config: ExchangeConfig,
        gateway: Arc<dyn NotarizationGateway>,
        audit: Arc<dyn AuditRecorder>,
    ) -> Self {
        let ledger = Arc::new(LedgerStore::new(audit.clone()));
        let escrow = Arc::new(EscrowManager::new(
            ledger.clone(),
            config.fees,
            audit.clone(),
        ));
        let transactions = Arc::new(TransactionStore::new());
        let dispatcher =
            NotarizationDispatcher::spawn(gateway, transactions.clone(), config.notary);
        let processor = Arc::new(SettlementProcessor::new(
            ledger.clone(),
            escrow.clone(),
            transactions.clone(),
            dispatcher.queue(),
            audit,
            config.settlement,
        ));
        let engine = MatchingEngine::new(processor);

        Self {
            ledger,
            escrow,
            engine,
            transactions,
            dispatcher: Some(dispatcher),
        }
    }

    /// Register an account for a verified identity
    pub fn open_account(&self, account_id: AccountId) -> Result<(), ExchangeError> {
        self.ledger.open_account(account_id, now_nanos())?;
        Ok(())
    }

    /// Credit cash from the external on-ramp
    pub fn deposit_cash(&self, account_id: AccountId, amount: Fils) -> Result<Fils, ExchangeError> {
        Ok(self.ledger.deposit_cash(account_id, amount, now_nanos())?)
    }

    /// Credit certificates acquired off-platform into a holding lot
    pub fn deposit_certificates(
        &self,
        account_id: AccountId,
        key: &CertificateKey,
        quantity: u64,
        acquisition_price: Fils,
    ) -> Result<HoldingId, ExchangeError> {
        Ok(self
            .ledger
            .deposit_certificates(account_id, key, quantity, acquisition_price, now_nanos())?)
    }

    /// Submit a buy order
    pub fn submit_buy(&self, request: BuyOrderRequest) -> Result<OrderReceipt, ExchangeError> {
        let order = Order::new(
            request.account_id,
            Side::Buy,
            request.key,
            None,
            request.price,
            request.quantity,
            request.allow_partial_fill,
            request.min_fill_quantity,
            request.expires_at,
            now_nanos(),
        );
        self.submit(order)
    }

    /// Submit a sell order against a specific holding lot
    pub fn submit_sell(&self, request: SellOrderRequest) -> Result<OrderReceipt, ExchangeError> {
        let holding = self
            .ledger
            .holding(request.account_id, request.holding_id)?;

        let order = Order::new(
            request.account_id,
            Side::Sell,
            holding.key,
            Some(request.holding_id),
            request.price,
            request.quantity,
            request.allow_partial_fill,
            request.min_fill_quantity,
            request.expires_at,
            now_nanos(),
        );
        self.submit(order)
    }

    fn submit(&self, order: Order) -> Result<OrderReceipt, ExchangeError> {
        // Rejected orders never reach the escrow manager or the book
        order.validate()?;
        let now = order.created_at;
        self.escrow.reserve_for_order(&order, now)?;

        let report = self.engine.submit(order, now);
        self.release_expired(&report.expired);

        Ok(OrderReceipt {
            order: report.order,
            matches: report.matches,
            transactions: report.transactions,
            failures: report.failures,
        })
    }

    /// Cancel the still-open remainder of an order.
    ///
    /// Releases exactly the reservation covering the unmatched
    /// remainder; prior fills stay settled.
    pub fn cancel_order(
        &self,
        account_id: AccountId,
        order_id: OrderId,
    ) -> Result<Order, ExchangeError> {
        let now = now_nanos();
        let cancelled = self.engine.cancel(order_id, account_id, now)?;
        self.escrow.release_remainder(&cancelled, now)?;
        Ok(cancelled)
    }

    /// Sweep every resting order whose expiry deadline has passed.
    ///
    /// Returns how many orders were expired and released.
    pub fn sweep_expired(&self) -> usize {
        let now = now_nanos();
        let swept = self.engine.sweep_expired(now);
        self.release_expired(&swept);
        swept.len()
    }

    /// Depth view of one certificate partition
    pub fn order_book(&self, key: &CertificateKey, depth: usize) -> BookSnapshot {
        self.engine.book(key, depth)
    }

    /// Look up an order, open or terminal
    pub fn order(&self, order_id: &OrderId) -> Option<Order> {
        self.engine.order(order_id)
    }

    /// Look up a settlement transaction
    pub fn transaction(&self, transaction_id: &TransactionId) -> Option<Transaction> {
        self.transactions.get(transaction_id)
    }

    /// Balance view for one account
    pub fn account_balances(&self, account_id: AccountId) -> Result<BalancesSnapshot, ExchangeError> {
        Ok(self.ledger.balances(account_id)?)
    }

    /// Direct access for invariant checks and tooling
    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    pub fn escrow(&self) -> &Arc<EscrowManager> {
        &self.escrow
    }

    /// Stop the notarization dispatcher, joining its thread
    pub fn shutdown(mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.shutdown();
        }
    }

    fn release_expired(&self, expired: &[Order]) {
        let now = now_nanos();
        for order in expired {
            if let Err(err) = self.escrow.release_remainder(order, now) {
                warn!(order = %order.order_id, %err, "failed to release expired order escrow");
            }
        }
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
