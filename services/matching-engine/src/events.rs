//! Events emitted during matching

use serde::{Deserialize, Serialize};
use types::certificate::CertificateKey;
use types::ids::{AccountId, HoldingId, MatchId, OrderId};
use types::money::Fils;

/// One proposed fill between a buy and a sell order.
///
/// The match id is the settlement idempotency key: the settlement
/// processor applies each match event exactly once, no matter how often
/// it is replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub match_id: MatchId,
    pub key: CertificateKey,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_account_id: AccountId,
    pub seller_account_id: AccountId,
    /// Seller lot the certificates will be drawn from
    pub holding_id: HoldingId,
    pub quantity: u64,
    /// Resting order's price (maker price wins)
    pub clearing_price: Fils,
    pub matched_at: i64,
}
