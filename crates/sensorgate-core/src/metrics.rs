//! Counters for device workers and the serial bridge.
//!
//! Counters are plain atomics updated from hot paths (including the BLE
//! notification callback) and read through serializable snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of a device worker's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Connection attempts started.
    pub connect_attempts: u64,
    /// Attempts that produced a live link.
    pub connections: u64,
    /// Cleanups run (at most one per connection).
    pub cleanups: u64,
    /// Complete lines reassembled.
    pub lines: u64,
    /// Lines evicted from the full line queue.
    pub lines_dropped: u64,
    /// Records decoded successfully.
    pub records: u64,
    /// Lines that failed to decode.
    pub decode_errors: u64,
    /// Records dropped because a downstream queue was full.
    pub records_dropped: u64,
}

/// Thread-safe counters behind [`LinkStats`].
#[derive(Debug, Default)]
pub struct LinkMetrics {
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    cleanups: AtomicU64,
    lines: AtomicU64,
    lines_dropped: AtomicU64,
    records: AtomicU64,
    decode_errors: AtomicU64,
    records_dropped: AtomicU64,
}

impl LinkMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connected(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn line(&self, dropped: bool) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        if dropped {
            self.lines_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> LinkStats {
        LinkStats {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            cleanups: self.cleanups.load(Ordering::Relaxed),
            lines: self.lines.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of the serial bridge's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Requests accepted into the command queue.
    pub enqueued: u64,
    /// Requests rejected because the queue was full or closed.
    pub rejected: u64,
    /// Requests that completed on the first or second attempt.
    pub completed: u64,
    /// Requests answered with a degraded value after two failures.
    pub degraded: u64,
    /// Port recoveries performed.
    pub recoveries: u64,
}

/// Thread-safe counters behind [`BridgeStats`].
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    degraded: AtomicU64,
    recoveries: AtomicU64,
}

impl BridgeMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}
