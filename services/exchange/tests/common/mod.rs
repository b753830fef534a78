//! Shared fixtures for the exchange integration tests
#![allow(dead_code)]

use audit::MemoryRecorder;
use exchange::{Exchange, ExchangeConfig};
use parking_lot::Mutex;
use settlement::{NotarizationGateway, NotaryConfig};
use std::sync::Arc;
use std::time::Duration;
use types::certificate::{CertificateKey, CertificationStandard, Emirate, EnergyType};
use types::errors::NotarizationError;
use types::ids::{AccountId, FacilityId, HoldingId, TransactionId};
use types::money::Fils;

/// Gateway double with a switchable failure mode
pub struct RecordingGateway {
    pub fail: Mutex<bool>,
    pub calls: Mutex<Vec<TransactionId>>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl NotarizationGateway for RecordingGateway {
    fn notarize(
        &self,
        transaction_id: TransactionId,
        _payload: &[u8],
    ) -> Result<String, NotarizationError> {
        self.calls.lock().push(transaction_id);
        if *self.fail.lock() {
            return Err(NotarizationError::Unavailable("network down".to_string()));
        }
        Ok(format!("chain:{transaction_id}"))
    }
}

pub struct TestBench {
    pub exchange: Exchange,
    pub recorder: Arc<MemoryRecorder>,
    pub gateway: Arc<RecordingGateway>,
}

pub fn bench() -> TestBench {
    let recorder = Arc::new(MemoryRecorder::new());
    let gateway = RecordingGateway::new();
    let config = ExchangeConfig {
        notary: NotaryConfig {
            max_attempts: 1_000,
            retry_delay: Duration::from_millis(1),
        },
        ..ExchangeConfig::default()
    };
    let exchange = Exchange::new(config, gateway.clone(), recorder.clone());
    TestBench {
        exchange,
        recorder,
        gateway,
    }
}

pub fn solar_key() -> CertificateKey {
    CertificateKey {
        facility: FacilityId::new("SHAMS-1"),
        energy_type: EnergyType::Solar,
        vintage: 2024,
        emirate: Emirate::AbuDhabi,
        standard: CertificationStandard::IRec,
    }
}

pub fn wind_key() -> CertificateKey {
    CertificateKey {
        facility: FacilityId::new("DHOFAR-W2"),
        energy_type: EnergyType::Wind,
        vintage: 2025,
        emirate: Emirate::Dubai,
        standard: CertificationStandard::Tigr,
    }
}

/// Open an account holding `cash` fils
pub fn funded_buyer(exchange: &Exchange, cash: i64) -> AccountId {
    let account = AccountId::new();
    exchange.open_account(account).unwrap();
    exchange.deposit_cash(account, Fils::new(cash)).unwrap();
    account
}

/// Open an account holding `units` certificates under `key`
pub fn funded_seller(
    exchange: &Exchange,
    key: &CertificateKey,
    units: u64,
) -> (AccountId, HoldingId) {
    let account = AccountId::new();
    exchange.open_account(account).unwrap();
    let holding_id = exchange
        .deposit_certificates(account, key, units, Fils::new(4_500))
        .unwrap();
    (account, holding_id)
}

/// Poll until the condition holds or the deadline passes
pub fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached in time");
}
