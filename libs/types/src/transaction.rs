//! Settlement record types
//!
//! A Transaction is the immutable record of one match between a buy and
//! a sell order. Economic fields freeze once the ledger transfer has
//! completed; only the notarization fields may change afterwards,
//! because notarization is advisory and never affects trade finality.

use crate::certificate::CertificateKey;
use crate::ids::{AccountId, HoldingId, MatchId, OrderId, TransactionId};
use crate::money::Fils;
use serde::{Deserialize, Serialize};

/// Ledger-settlement status of the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    /// Created, ledger transfer in flight
    Pending,
    /// Ledger transfer applied; economically final (terminal)
    Completed,
    /// Ledger transfer rejected; nothing was applied (terminal)
    Failed,
}

/// Notarization status of the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettlementStatus {
    /// Not yet durably timestamped by the external network
    Pending,
    /// Notarization reference attached
    Completed,
}

/// The settlement record of one match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    /// Idempotency key: one transaction per match event
    pub match_id: MatchId,

    pub buyer_account_id: AccountId,
    pub seller_account_id: AccountId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    /// Seller lot the certificates were drawn from
    pub holding_id: HoldingId,
    pub key: CertificateKey,

    pub quantity: u64,
    pub price_per_unit: Fils,
    pub total_amount: Fils,
    pub buyer_fee: Fils,
    pub seller_fee: Fils,
    pub notarization_fee: Fils,

    pub status: TransactionStatus,
    pub settlement_status: SettlementStatus,
    pub notarization_ref: Option<String>,

    pub executed_at: i64,
    pub notarized_at: Option<i64>,
}

impl Transaction {
    /// Create a new pending transaction
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        match_id: MatchId,
        buyer_account_id: AccountId,
        seller_account_id: AccountId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        holding_id: HoldingId,
        key: CertificateKey,
        quantity: u64,
        price_per_unit: Fils,
        total_amount: Fils,
        buyer_fee: Fils,
        seller_fee: Fils,
        notarization_fee: Fils,
        executed_at: i64,
    ) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            match_id,
            buyer_account_id,
            seller_account_id,
            buy_order_id,
            sell_order_id,
            holding_id,
            key,
            quantity,
            price_per_unit,
            total_amount,
            buyer_fee,
            seller_fee,
            notarization_fee,
            status: TransactionStatus::Pending,
            settlement_status: SettlementStatus::Pending,
            notarization_ref: None,
            executed_at,
            notarized_at: None,
        }
    }

    /// Mark the ledger transfer as applied
    ///
    /// # Panics
    /// Panics if the transaction already failed
    pub fn complete(&mut self) {
        assert!(
            self.status != TransactionStatus::Failed,
            "Cannot complete a failed transaction"
        );
        self.status = TransactionStatus::Completed;
    }

    /// Attach the external notarization reference
    ///
    /// # Panics
    /// Panics if the ledger transfer has not completed
    pub fn attach_notarization(&mut self, reference: String, timestamp: i64) {
        assert!(
            self.is_completed(),
            "Cannot notarize an unsettled transaction"
        );
        self.settlement_status = SettlementStatus::Completed;
        self.notarization_ref = Some(reference);
        self.notarized_at = Some(timestamp);
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, TransactionStatus::Completed)
    }

    pub fn is_notarized(&self) -> bool {
        matches!(self.settlement_status, SettlementStatus::Completed)
    }

    /// Everything the platform collects on this transaction
    pub fn total_fees(&self) -> Fils {
        self.buyer_fee + self.seller_fee + self.notarization_fee
    }

    /// Total the buyer's reserved cash is debited
    pub fn buyer_outlay(&self) -> Fils {
        self.total_amount + self.buyer_fee + self.notarization_fee
    }

    /// Net amount credited to the seller
    pub fn seller_proceeds(&self) -> Fils {
        self.total_amount - self.seller_fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::{CertificationStandard, Emirate, EnergyType};
    use crate::ids::FacilityId;

    fn sample() -> Transaction {
        Transaction::new(
            MatchId::new(),
            AccountId::new(),
            AccountId::new(),
            OrderId::new(),
            OrderId::new(),
            HoldingId::new(),
            CertificateKey {
                facility: FacilityId::new("SHAMS-1"),
                energy_type: EnergyType::Solar,
                vintage: 2024,
                emirate: Emirate::AbuDhabi,
                standard: CertificationStandard::IRec,
            },
            60,
            Fils::new(5_000),
            Fils::new(300_000),
            Fils::new(750),
            Fils::new(750),
            Fils::new(100),
            1_708_123_456_789_000_000,
        )
    }

    #[test]
    fn test_transaction_starts_pending() {
        let tx = sample();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.settlement_status, SettlementStatus::Pending);
        assert!(tx.notarization_ref.is_none());
    }

    #[test]
    fn test_transaction_amounts() {
        let tx = sample();
        assert_eq!(tx.total_fees(), Fils::new(1_600));
        assert_eq!(tx.buyer_outlay(), Fils::new(300_850));
        assert_eq!(tx.seller_proceeds(), Fils::new(299_250));
    }

    #[test]
    fn test_transaction_completion_and_notarization() {
        let mut tx = sample();
        tx.complete();
        assert!(tx.is_completed());
        assert!(!tx.is_notarized());

        tx.attach_notarization("chain:0xabc123".to_string(), 1_708_123_456_790_000_000);
        assert!(tx.is_notarized());
        assert_eq!(tx.notarization_ref.as_deref(), Some("chain:0xabc123"));
        assert!(tx.notarized_at.is_some());
    }

    #[test]
    #[should_panic(expected = "Cannot notarize an unsettled transaction")]
    fn test_notarize_pending_panics() {
        let mut tx = sample();
        tx.attach_notarization("chain:0xabc123".to_string(), 0);
    }

    #[test]
    fn test_transaction_serialization() {
        let tx = sample();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }
}
