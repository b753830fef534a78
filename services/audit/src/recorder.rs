//! Audit record structure and recorder trait

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use types::ids::AccountId;

/// Who performed the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum Actor {
    #[serde(rename = "ACCOUNT")]
    Account(AccountId),
    #[serde(rename = "SYSTEM")]
    System,
}

/// Kind of entity the action mutated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    Account,
    Holding,
    Order,
    Transaction,
}

/// One immutable record of a state-changing action.
///
/// `before` and `after` are JSON snapshots of the mutated entity so the
/// trail can reconstruct any balance at any point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor: Actor,
    pub action: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub before: Value,
    pub after: Value,
    pub timestamp: i64,
}

impl AuditRecord {
    pub fn new(
        actor: Actor,
        action: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        before: Value,
        after: Value,
        timestamp: i64,
    ) -> Self {
        Self {
            actor,
            action: action.into(),
            entity_type,
            entity_id: entity_id.into(),
            before,
            after,
            timestamp,
        }
    }
}

/// Sink for audit records.
///
/// Recording must never fail the business operation that produced the
/// record; implementations log their own write errors.
pub trait AuditRecorder: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// In-memory recorder for tests and inspection
#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of all records in emission order
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    /// All records with the given action name
    pub fn with_action(&self, action: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.action == action)
            .cloned()
            .collect()
    }
}

impl AuditRecorder for MemoryRecorder {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}
