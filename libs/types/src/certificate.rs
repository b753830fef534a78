//! Certificate attributes and holding lots
//!
//! A certificate is identified by its generating facility, energy type,
//! vintage year, emirate, and certification standard. Orders select
//! certificates by exact match on all five attributes, which also makes
//! the tuple the order-book partition key.

use crate::ids::{AccountId, FacilityId, HoldingId};
use crate::money::Fils;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Energy source that generated the certificates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnergyType {
    Solar,
    Wind,
    Hydro,
    Nuclear,
    Biomass,
}

/// Emirate in which the generating facility is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Emirate {
    AbuDhabi,
    Dubai,
    Sharjah,
    Ajman,
    UmmAlQuwain,
    RasAlKhaimah,
    Fujairah,
}

/// Certification standard the certificates are issued under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificationStandard {
    #[serde(rename = "I-REC")]
    IRec,
    #[serde(rename = "TIGR")]
    Tigr,
}

/// Certificate-selection criteria and order-book partition key.
///
/// Two orders are compatible only when their keys are identical; each
/// distinct key owns an independent book partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateKey {
    pub facility: FacilityId,
    pub energy_type: EnergyType,
    pub vintage: u16,
    pub emirate: Emirate,
    pub standard: CertificationStandard,
}

impl fmt::Display for CertificateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{:?}/{}/{:?}/{:?}",
            self.facility, self.energy_type, self.vintage, self.emirate, self.standard
        )
    }
}

/// Lifecycle status of a holding lot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HoldingStatus {
    /// Tradable; some units may still be reserved against open orders
    Active,
    /// Administratively frozen, not tradable
    Locked,
    /// Every unit reserved against open sell orders
    Reserved,
    /// Quantity reached zero; kept for audit lineage, never deleted
    Retired,
}

/// A lot of certificates owned by one account.
///
/// Quantity only ever decreases through settlement of a completed sell;
/// a lot that reaches zero is retired, not destroyed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub holding_id: HoldingId,
    pub account_id: AccountId,
    pub key: CertificateKey,
    pub quantity: u64,
    pub reserved_quantity: u64,
    pub acquisition_price: Fils,
    pub status: HoldingStatus,
    pub acquired_at: i64,
}

impl Holding {
    /// Create a new active lot
    pub fn new(
        account_id: AccountId,
        key: CertificateKey,
        quantity: u64,
        acquisition_price: Fils,
        timestamp: i64,
    ) -> Self {
        Self {
            holding_id: HoldingId::new(),
            account_id,
            key,
            quantity,
            reserved_quantity: 0,
            acquisition_price,
            status: HoldingStatus::Active,
            acquired_at: timestamp,
        }
    }

    /// Units not reserved against open sell orders
    pub fn available(&self) -> u64 {
        self.quantity - self.reserved_quantity
    }

    /// Check the holding invariant: reserved ≤ quantity
    pub fn check_invariant(&self) -> bool {
        self.reserved_quantity <= self.quantity
    }

    pub fn is_tradable(&self) -> bool {
        matches!(self.status, HoldingStatus::Active | HoldingStatus::Reserved)
    }

    pub fn is_retired(&self) -> bool {
        matches!(self.status, HoldingStatus::Retired)
    }

    /// Reserve units against an open sell order
    ///
    /// # Panics
    /// Panics if the lot is not tradable or the units are not available
    pub fn reserve(&mut self, units: u64) {
        assert!(self.is_tradable(), "Cannot reserve on a non-tradable lot");
        assert!(units <= self.available(), "Insufficient available units");

        self.reserved_quantity += units;
        self.refresh_status();

        assert!(self.check_invariant(), "Invariant violated after reserve");
    }

    /// Release previously reserved units
    ///
    /// # Panics
    /// Panics if more units are released than are reserved
    pub fn release(&mut self, units: u64) {
        assert!(units <= self.reserved_quantity, "Insufficient reserved units");

        self.reserved_quantity -= units;
        self.refresh_status();

        assert!(self.check_invariant(), "Invariant violated after release");
    }

    /// Consume reserved units on a completed sell settlement.
    ///
    /// Retires the lot when quantity reaches zero.
    ///
    /// # Panics
    /// Panics if more units are consumed than are reserved
    pub fn debit_reserved(&mut self, units: u64) {
        assert!(units <= self.reserved_quantity, "Insufficient reserved units");

        self.reserved_quantity -= units;
        self.quantity -= units;
        if self.quantity == 0 {
            self.status = HoldingStatus::Retired;
        } else {
            self.refresh_status();
        }

        assert!(self.check_invariant(), "Invariant violated after debit");
    }

    /// Add units to the lot (buy-side settlement on a matching lot)
    pub fn credit(&mut self, units: u64) {
        assert!(self.is_tradable(), "Cannot credit a non-tradable lot");

        self.quantity += units;
        self.refresh_status();
    }

    fn refresh_status(&mut self) {
        if matches!(self.status, HoldingStatus::Locked | HoldingStatus::Retired) {
            return;
        }
        self.status = if self.quantity > 0 && self.reserved_quantity == self.quantity {
            HoldingStatus::Reserved
        } else {
            HoldingStatus::Active
        };
    }
}
