//! The journal-backed audit trail through a full trading flow

mod common;

use audit::{AuditJournal, JournalConfig};
use common::RecordingGateway;
use exchange::{BuyOrderRequest, Exchange, ExchangeConfig, SellOrderRequest};
use std::sync::Arc;
use tempfile::TempDir;
use types::money::Fils;

#[test]
fn every_mutation_lands_in_the_journal() {
    let tmp = TempDir::new().unwrap();
    let journal = Arc::new(AuditJournal::open(JournalConfig::new(tmp.path())).unwrap());
    let exchange = Exchange::new(
        ExchangeConfig::default(),
        RecordingGateway::new(),
        journal.clone(),
    );

    let buyer = common::funded_buyer(&exchange, 1_000_000);
    let (seller, holding_id) = common::funded_seller(&exchange, &common::solar_key(), 50);

    exchange
        .submit_sell(SellOrderRequest {
            account_id: seller,
            holding_id,
            quantity: 50,
            price: Fils::new(5_000),
            allow_partial_fill: true,
            min_fill_quantity: None,
            expires_at: None,
        })
        .unwrap();
    exchange
        .submit_buy(BuyOrderRequest {
            account_id: buyer,
            key: common::solar_key(),
            quantity: 50,
            price: Fils::new(5_000),
            allow_partial_fill: true,
            min_fill_quantity: None,
            expires_at: None,
        })
        .unwrap();

    exchange.shutdown();

    // Sequences are dense and every checksum verifies
    let entries = journal.read_all().unwrap();
    for (i, (sequence, _)) in entries.iter().enumerate() {
        assert_eq!(*sequence, i as u64);
    }

    let actions: Vec<&str> = entries.iter().map(|(_, r)| r.action.as_str()).collect();
    for expected in [
        "AccountOpened",
        "CashDeposited",
        "CertificatesDeposited",
        "CashReserved",
        "QuantityReserved",
        "EscrowReserved",
        "TradeSettled",
        "EscrowConsumed",
        "TransactionCreated",
    ] {
        assert!(
            actions.contains(&expected),
            "journal is missing action {expected}"
        );
    }

    // Balance snapshots bracket the settlement
    let settled: Vec<_> = entries
        .iter()
        .filter(|(_, r)| r.action == "TradeSettled")
        .collect();
    assert_eq!(settled.len(), 2);
    for (_, record) in settled {
        assert!(record.before.get("cash_balance").is_some());
        assert!(record.after.get("cash_balance").is_some());
    }
}
