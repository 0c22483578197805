use std::sync::atomic::{AtomicU64, Ordering};

use super::decode::{RejectKind, REJECT_KIND_COUNT};

/// Lock-free ingestion counters shared by the reader and workers.
pub struct IngestStats {
    rows_read: AtomicU64,
    accepted: AtomicU64,
    rejected: [AtomicU64; REJECT_KIND_COUNT],
}

/// Point-in-time view of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Data rows taken from the source, header excluded.
    pub rows_read: u64,
    pub accepted: u64,
    pub rejected: [u64; REJECT_KIND_COUNT],
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            rows_read: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            rejected: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn record_read(&self) {
        self.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, kind: RejectKind) {
        if let Some(counter) = self.rejected.get(kind as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reads all counters without resetting them.
    pub fn snapshot(&self) -> IngestSummary {
        IngestSummary {
            rows_read: self.rows_read.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: std::array::from_fn(|i| self.rejected[i].load(Ordering::Relaxed)),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestSummary {
    pub fn rejected_total(&self) -> u64 {
        self.rejected.iter().sum()
    }

    pub fn rejected_of(&self, kind: RejectKind) -> u64 {
        self.rejected[kind as usize]
    }

    /// Rows read but neither accepted nor rejected. Non-zero only when a
    /// run was cut short.
    pub fn unprocessed(&self) -> u64 {
        self.rows_read
            .saturating_sub(self.accepted + self.rejected_total())
    }
}
