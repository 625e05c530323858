//! Backfill counters
//!
//! Plain relaxed atomics; a [`MetricsSnapshot`] is a point-in-time copy that
//! callers can log or export however they like.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by a `BackfillEngine`
#[derive(Debug, Default)]
pub struct BackfillMetrics {
    fills_started: AtomicU64,
    fills_committed: AtomicU64,
    fills_no_progress: AtomicU64,
    fills_cancelled: AtomicU64,
    entries_stored: AtomicU64,
    decode_failures: AtomicU64,
    entries_clipped: AtomicU64,
    holes_closed: AtomicU64,
}

/// Point-in-time copy of [`BackfillMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Fill steps that reached the remote
    pub fills_started: u64,
    /// Steps whose page was merged
    pub fills_committed: u64,
    /// Steps the remote could not serve
    pub fills_no_progress: u64,
    /// Steps abandoned on cancellation
    pub fills_cancelled: u64,
    /// Messages or conversations written
    pub entries_stored: u64,
    /// Wire records that failed to decode
    pub decode_failures: u64,
    /// Records dropped for falling outside their hole
    pub entries_clipped: u64,
    /// Holes removed by a fill
    pub holes_closed: u64,
}

impl BackfillMetrics {
    /// Counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fill_started(&self) {
        self.fills_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill_no_progress(&self) {
        self.fills_no_progress.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fill_cancelled(&self) {
        self.fills_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one committed page
    pub(crate) fn fill_committed(&self, stored: usize, decode_failures: usize, clipped: usize, closed: bool) {
        self.fills_committed.fetch_add(1, Ordering::Relaxed);
        self.entries_stored.fetch_add(stored as u64, Ordering::Relaxed);
        self.decode_failures
            .fetch_add(decode_failures as u64, Ordering::Relaxed);
        self.entries_clipped.fetch_add(clipped as u64, Ordering::Relaxed);
        if closed {
            self.holes_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current values of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fills_started: self.fills_started.load(Ordering::Relaxed),
            fills_committed: self.fills_committed.load(Ordering::Relaxed),
            fills_no_progress: self.fills_no_progress.load(Ordering::Relaxed),
            fills_cancelled: self.fills_cancelled.load(Ordering::Relaxed),
            entries_stored: self.entries_stored.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            entries_clipped: self.entries_clipped.load(Ordering::Relaxed),
            holes_closed: self.holes_closed.load(Ordering::Relaxed),
        }
    }
}
