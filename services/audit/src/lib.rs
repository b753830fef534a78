//! Audit Recorder
//!
//! Every state-changing action in the ledger, escrow manager, and
//! settlement processor emits an immutable [`AuditRecord`] through the
//! [`AuditRecorder`] trait. Two recorders are provided: an in-memory
//! recorder for tests and inspection, and an append-only binary journal
//! with checksums and file rotation.

pub mod journal;
pub mod recorder;

pub use journal::{AuditJournal, FlushPolicy, FsyncPolicy, JournalConfig, JournalError};
pub use recorder::{Actor, AuditRecord, AuditRecorder, EntityType, MemoryRecorder};
