//! Notarization Gateway
//!
//! External collaborator that durably timestamps completed transactions
//! on a distributed ledger network. It is advisory: a completed trade is
//! never unwound because notarization failed. The dispatcher drains a
//! queue on its own thread so gateway latency never touches the
//! settlement-critical path.

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};
use types::certificate::CertificateKey;
use types::errors::NotarizationError;
use types::ids::{AccountId, MatchId, TransactionId};
use types::money::Fils;
use types::transaction::Transaction;

use crate::store::TransactionStore;

/// External notarization network.
///
/// May be slow or unavailable; the core treats it as best-effort.
pub trait NotarizationGateway: Send + Sync {
    /// Durably timestamp a transaction, returning an external reference
    fn notarize(
        &self,
        transaction_id: TransactionId,
        payload: &[u8],
    ) -> Result<String, NotarizationError>;
}

/// Wire payload handed to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotarizationPayload {
    pub transaction_id: TransactionId,
    pub match_id: MatchId,
    pub buyer_account_id: AccountId,
    pub seller_account_id: AccountId,
    pub key: CertificateKey,
    pub quantity: u64,
    pub price_per_unit: Fils,
    pub total_amount: Fils,
    pub executed_at: i64,
}

impl NotarizationPayload {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.transaction_id,
            match_id: tx.match_id,
            buyer_account_id: tx.buyer_account_id,
            seller_account_id: tx.seller_account_id,
            key: tx.key.clone(),
            quantity: tx.quantity,
            price_per_unit: tx.price_per_unit,
            total_amount: tx.total_amount,
            executed_at: tx.executed_at,
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct NotaryConfig {
    /// Attempts per transaction before the job is parked as pending
    pub max_attempts: u32,
    /// Delay between attempts for one transaction
    pub retry_delay: Duration,
}

impl Default for NotaryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(200),
        }
    }
}

enum NotaryMessage {
    Job { transaction_id: TransactionId, attempt: u32 },
    Shutdown,
}

/// Queue handle given to the settlement processor
#[derive(Clone)]
pub struct NotaryQueue {
    sender: Sender<NotaryMessage>,
}

impl NotaryQueue {
    /// Enqueue a transaction for notarization, fire-and-forget
    pub fn enqueue(&self, transaction_id: TransactionId) {
        if self
            .sender
            .send(NotaryMessage::Job {
                transaction_id,
                attempt: 0,
            })
            .is_err()
        {
            warn!(%transaction_id, "notarization dispatcher is down, job dropped");
        }
    }
}

/// Background worker draining the notarization queue
pub struct NotarizationDispatcher {
    queue: NotaryQueue,
    handle: Option<JoinHandle<()>>,
}

impl NotarizationDispatcher {
    /// Spawn the dispatcher thread
    pub fn spawn(
        gateway: Arc<dyn NotarizationGateway>,
        store: Arc<TransactionStore>,
        config: NotaryConfig,
    ) -> Self {
        let (sender, receiver) = unbounded();
        let queue = NotaryQueue {
            sender: sender.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("notary-dispatcher".to_string())
            .spawn(move || run_dispatcher(gateway, store, config, sender, receiver))
            .ok();

        if handle.is_none() {
            warn!("failed to spawn notarization dispatcher thread");
        }

        Self { queue, handle }
    }

    /// Queue handle for enqueuing jobs
    pub fn queue(&self) -> NotaryQueue {
        self.queue.clone()
    }

    /// Stop the dispatcher after the current job, joining the thread
    pub fn shutdown(mut self) {
        let _ = self.queue.sender.send(NotaryMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_dispatcher(
    gateway: Arc<dyn NotarizationGateway>,
    store: Arc<TransactionStore>,
    config: NotaryConfig,
    sender: Sender<NotaryMessage>,
    receiver: Receiver<NotaryMessage>,
) {
    while let Ok(message) = receiver.recv() {
        let (transaction_id, attempt) = match message {
            NotaryMessage::Job {
                transaction_id,
                attempt,
            } => (transaction_id, attempt),
            NotaryMessage::Shutdown => break,
        };

        let Some(transaction) = store.get(&transaction_id) else {
            warn!(%transaction_id, "notarization job for unknown transaction");
            continue;
        };
        if transaction.is_notarized() {
            continue;
        }

        let payload = match bincode::serialize(&NotarizationPayload::from_transaction(&transaction))
        {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%transaction_id, %err, "failed to encode notarization payload");
                continue;
            }
        };

        match gateway.notarize(transaction_id, &payload) {
            Ok(reference) => {
                let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
                store.mark_notarized(&transaction_id, reference, now);
                info!(%transaction_id, "transaction notarized");
            }
            Err(err) => {
                let next_attempt = attempt + 1;
                if next_attempt < config.max_attempts {
                    warn!(%transaction_id, attempt = next_attempt, %err, "notarization failed, requeueing");
                    std::thread::sleep(config.retry_delay);
                    let _ = sender.send(NotaryMessage::Job {
                        transaction_id,
                        attempt: next_attempt,
                    });
                } else {
                    // Trade stays economically final; only the external
                    // timestamp is missing
                    warn!(%transaction_id, attempts = next_attempt, %err, "notarization attempts exhausted, parked as pending");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use types::certificate::{CertificationStandard, Emirate, EnergyType};
    use types::ids::{FacilityId, HoldingId, OrderId};

    fn completed_tx() -> Transaction {
        let mut tx = Transaction::new(
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
            10,
            Fils::new(5_000),
            Fils::new(50_000),
            Fils::new(125),
            Fils::new(125),
            Fils::new(100),
            1_708_123_456_789_000_000,
        );
        tx.complete();
        tx
    }

    /// Gateway double that fails a configured number of times first
    struct FlakyGateway {
        failures_left: Mutex<u32>,
        calls: Mutex<u32>,
    }

    impl FlakyGateway {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_left: Mutex::new(failures),
                calls: Mutex::new(0),
            })
        }
    }

    impl NotarizationGateway for FlakyGateway {
        fn notarize(
            &self,
            transaction_id: TransactionId,
            _payload: &[u8],
        ) -> Result<String, NotarizationError> {
            *self.calls.lock() += 1;
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(NotarizationError::Unavailable("network down".to_string()));
            }
            Ok(format!("chain:{transaction_id}"))
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_dispatcher_notarizes_transaction() {
        let store = Arc::new(TransactionStore::new());
        let tx = completed_tx();
        let tx_id = tx.transaction_id;
        store.insert(tx);

        let gateway = FlakyGateway::new(0);
        let dispatcher = NotarizationDispatcher::spawn(
            gateway,
            store.clone(),
            NotaryConfig {
                max_attempts: 3,
                retry_delay: Duration::from_millis(1),
            },
        );

        dispatcher.queue().enqueue(tx_id);
        wait_for(|| store.get(&tx_id).is_some_and(|t| t.is_notarized()));

        let notarized = store.get(&tx_id).unwrap();
        assert!(notarized.notarization_ref.is_some());
        dispatcher.shutdown();
    }

    #[test]
    fn test_dispatcher_retries_until_success() {
        let store = Arc::new(TransactionStore::new());
        let tx = completed_tx();
        let tx_id = tx.transaction_id;
        store.insert(tx);

        let gateway = FlakyGateway::new(2);
        let dispatcher = NotarizationDispatcher::spawn(
            gateway.clone(),
            store.clone(),
            NotaryConfig {
                max_attempts: 5,
                retry_delay: Duration::from_millis(1),
            },
        );

        dispatcher.queue().enqueue(tx_id);
        wait_for(|| store.get(&tx_id).is_some_and(|t| t.is_notarized()));

        assert_eq!(*gateway.calls.lock(), 3);
        dispatcher.shutdown();
    }

    #[test]
    fn test_exhausted_attempts_leave_trade_final() {
        let store = Arc::new(TransactionStore::new());
        let tx = completed_tx();
        let tx_id = tx.transaction_id;
        store.insert(tx);

        let gateway = FlakyGateway::new(u32::MAX);
        let dispatcher = NotarizationDispatcher::spawn(
            gateway.clone(),
            store.clone(),
            NotaryConfig {
                max_attempts: 2,
                retry_delay: Duration::from_millis(1),
            },
        );

        dispatcher.queue().enqueue(tx_id);
        wait_for(|| *gateway.calls.lock() >= 2);
        dispatcher.shutdown();

        // Economically final, notarization still pending
        let parked = store.get(&tx_id).unwrap();
        assert!(parked.is_completed());
        assert!(!parked.is_notarized());
        assert!(parked.notarization_ref.is_none());
    }

    #[test]
    fn test_payload_roundtrip() {
        let tx = completed_tx();
        let payload = NotarizationPayload::from_transaction(&tx);
        let bytes = bincode::serialize(&payload).unwrap();
        let back: NotarizationPayload = bincode::deserialize(&bytes).unwrap();
        assert_eq!(payload, back);
    }
}
