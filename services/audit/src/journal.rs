//! Append-only audit journal with checksums
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len:  u32]
//! [sequence:  u64]
//! [timestamp: i64]
//! [payload_len: u32][payload: JSON-encoded AuditRecord]
//! [checksum: u32]  // CRC32C over sequence+timestamp+payload
//! ```

use crate::recorder::{AuditRecord, AuditRecorder};
use crc32c::crc32c;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt entry at offset {offset}: {reason}")]
    Corrupt { offset: usize, reason: String },
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// Controls when buffered data is flushed to the OS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlushPolicy {
    /// Flush after every write.
    EveryWrite,
    /// Flush every N writes.
    EveryN(usize),
}

/// Controls when `fsync` (durable write) is called.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    EveryWrite,
    /// Fsync every N writes.
    EveryN(usize),
    /// Fsync only on file rotation.
    OnRotation,
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for the audit journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory for journal files.
    pub dir: PathBuf,
    /// Maximum file size in bytes before rotation (default 64 MiB).
    pub max_file_size: u64,
    /// Flush policy.
    pub flush_policy: FlushPolicy,
    /// Fsync policy.
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    /// Create a config with sensible defaults.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024, // 64 MiB
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::OnRotation,
        }
    }
}

// ── Journal ─────────────────────────────────────────────────────────

struct JournalInner {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
    file_index: u64,
}

/// Append-only audit journal with CRC32C checksums and rotation.
///
/// Thread-safe: entries from concurrent components interleave but each
/// entry is written whole, with a monotonically increasing sequence.
pub struct AuditJournal {
    config: JournalConfig,
    inner: Mutex<JournalInner>,
}

impl AuditJournal {
    /// Open the journal, creating the directory if needed and resuming
    /// after any existing files.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = Self::find_latest_index(&config.dir);
        let current_file = Self::journal_path(&config.dir, file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;
        let current_file_size = file.metadata()?.len();

        let next_sequence = Self::read_dir_entries(&config.dir)?
            .last()
            .map(|(seq, _)| seq + 1)
            .unwrap_or(0);

        Ok(Self {
            config,
            inner: Mutex::new(JournalInner {
                writer: BufWriter::new(file),
                current_file,
                current_file_size,
                next_sequence,
                writes_since_flush: 0,
                writes_since_fsync: 0,
                file_index,
            }),
        })
    }

    /// Append a record, returning its assigned sequence number.
    pub fn append(&self, record: &AuditRecord) -> Result<u64, JournalError> {
        let payload =
            serde_json::to_vec(record).map_err(|e| JournalError::Serialization(e.to_string()))?;

        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        let bytes = Self::encode_frame(sequence, record.timestamp, &payload);

        if inner.current_file_size >= self.config.max_file_size {
            self.rotate(&mut inner)?;
        }

        inner.writer.write_all(&bytes)?;
        inner.current_file_size += bytes.len() as u64;
        inner.next_sequence += 1;
        inner.writes_since_flush += 1;
        inner.writes_since_fsync += 1;

        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => inner.writes_since_flush >= n,
        };
        if should_flush {
            inner.writer.flush()?;
            inner.writes_since_flush = 0;
        }

        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => inner.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            inner.writer.flush()?;
            inner.writer.get_ref().sync_all()?;
            inner.writes_since_fsync = 0;
        }

        Ok(sequence)
    }

    /// Force flush + fsync (used before shutdown).
    pub fn sync(&self) -> Result<(), JournalError> {
        let mut inner = self.inner.lock();
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        inner.writes_since_flush = 0;
        inner.writes_since_fsync = 0;
        Ok(())
    }

    /// Next sequence number that will be assigned.
    pub fn next_sequence(&self) -> u64 {
        self.inner.lock().next_sequence
    }

    /// Read every entry back in sequence order, verifying checksums.
    pub fn read_all(&self) -> Result<Vec<(u64, AuditRecord)>, JournalError> {
        self.sync()?;
        Self::read_dir_entries(&self.config.dir)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn encode_frame(sequence: u64, timestamp: i64, payload: &[u8]) -> Vec<u8> {
        let payload_len = payload.len() as u32;
        // body = 8 (seq) + 8 (ts) + 4 (payload_len) + payload + 4 (crc)
        let body_len: u32 = 8 + 8 + 4 + payload_len + 4;

        let checksum = Self::compute_checksum(sequence, timestamp, payload);

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    fn compute_checksum(sequence: u64, timestamp: i64, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    fn decode_frame(data: &[u8], offset: usize) -> Result<(u64, AuditRecord, usize), JournalError> {
        let corrupt = |reason: &str| JournalError::Corrupt {
            offset,
            reason: reason.to_string(),
        };

        if data.len() < 4 {
            return Err(corrupt("not enough data for length prefix"));
        }
        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        // minimum body: 8 + 8 + 4 + 0 + 4 = 24
        if body_len < 24 {
            return Err(corrupt("body too small"));
        }
        let total = 4 + body_len;
        if data.len() < total {
            return Err(corrupt("incomplete entry"));
        }

        let body = &data[4..total];
        let sequence = u64::from_le_bytes(body[0..8].try_into().expect("sized slice"));
        let timestamp = i64::from_le_bytes(body[8..16].try_into().expect("sized slice"));
        let payload_len = u32::from_le_bytes(body[16..20].try_into().expect("sized slice")) as usize;
        if 20 + payload_len + 4 != body.len() {
            return Err(corrupt("payload length mismatch"));
        }
        let payload = &body[20..20 + payload_len];
        let stored_checksum =
            u32::from_le_bytes(body[20 + payload_len..].try_into().expect("sized slice"));

        if Self::compute_checksum(sequence, timestamp, payload) != stored_checksum {
            return Err(corrupt("checksum mismatch"));
        }

        let record: AuditRecord = serde_json::from_slice(payload)
            .map_err(|e| JournalError::Serialization(e.to_string()))?;

        Ok((sequence, record, total))
    }

    fn read_dir_entries(dir: &Path) -> Result<Vec<(u64, AuditRecord)>, JournalError> {
        let mut indices: Vec<u64> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| Self::parse_index(&e.file_name().to_string_lossy()))
            .collect();
        indices.sort_unstable();

        let mut entries = Vec::new();
        for index in indices {
            let data = fs::read(Self::journal_path(dir, index))?;
            let mut pos = 0;
            while pos < data.len() {
                let (sequence, record, consumed) = Self::decode_frame(&data[pos..], pos)?;
                entries.push((sequence, record));
                pos += consumed;
            }
        }
        Ok(entries)
    }

    fn rotate(&self, inner: &mut JournalInner) -> Result<(), JournalError> {
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;

        inner.file_index += 1;
        inner.current_file = Self::journal_path(&self.config.dir, inner.file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.current_file)?;

        inner.writer = BufWriter::new(file);
        inner.current_file_size = 0;
        Ok(())
    }

    fn journal_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("audit-{:06}.bin", index))
    }

    fn parse_index(name: &str) -> Option<u64> {
        name.strip_prefix("audit-")?
            .strip_suffix(".bin")?
            .parse::<u64>()
            .ok()
    }

    fn find_latest_index(dir: &Path) -> u64 {
        fs::read_dir(dir)
            .ok()
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| Self::parse_index(&e.file_name().to_string_lossy()))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }
}

impl AuditRecorder for AuditJournal {
    fn record(&self, record: AuditRecord) {
        if let Err(err) = self.append(&record) {
            error!(action = %record.action, %err, "audit journal write failed");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
