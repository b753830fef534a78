//! Transaction store
//!
//! Holds every settled transaction, indexed by id and by originating
//! match event. The match-event index is the idempotency barrier for
//! crash-recovery replay.

use dashmap::DashMap;
use types::ids::{MatchId, TransactionId};
use types::transaction::Transaction;

/// Concurrent store of settlement transactions
#[derive(Default)]
pub struct TransactionStore {
    by_id: DashMap<TransactionId, Transaction>,
    by_match: DashMap<MatchId, TransactionId>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction and index its match event
    pub fn insert(&self, transaction: Transaction) {
        self.by_match
            .insert(transaction.match_id, transaction.transaction_id);
        self.by_id.insert(transaction.transaction_id, transaction);
    }

    pub fn get(&self, transaction_id: &TransactionId) -> Option<Transaction> {
        self.by_id.get(transaction_id).map(|entry| entry.value().clone())
    }

    /// Transaction id previously created for a match event, if any
    pub fn id_for_match(&self, match_id: &MatchId) -> Option<TransactionId> {
        self.by_match.get(match_id).map(|entry| *entry.value())
    }

    /// Attach a notarization reference to a completed transaction.
    ///
    /// Returns false if the transaction is unknown.
    pub fn mark_notarized(
        &self,
        transaction_id: &TransactionId,
        reference: String,
        timestamp: i64,
    ) -> bool {
        match self.by_id.get_mut(transaction_id) {
            Some(mut entry) => {
                entry.value_mut().attach_notarization(reference, timestamp);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
