//! Pipeline statistics with atomic counters.
//!
//! All counters use [`AtomicU64`] with relaxed ordering. They are for logging
//! and reporting only and never drive control flow.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters shared by every file task of a reader.
#[derive(Debug, Default)]
pub struct PipelineStats {
    files_dispatched: AtomicU64,
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    records_published: AtomicU64,
    delivery_failures: AtomicU64,
}

impl PipelineStats {
    /// Creates counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A file was handed to a worker.
    #[inline]
    pub fn file_dispatched(&self) {
        self.files_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A file finished with every record enqueued.
    #[inline]
    pub fn file_completed(&self) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// A file task aborted.
    #[inline]
    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was enqueued with the broker.
    #[inline]
    pub fn record_published(&self) {
        self.records_published.fetch_add(1, Ordering::Relaxed);
    }

    /// The broker reported a delivery failure.
    #[inline]
    pub fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_dispatched: self.files_dispatched.load(Ordering::Relaxed),
            files_completed: self.files_completed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            records_published: self.records_published.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Files handed to a worker.
    pub files_dispatched: u64,
    /// Files whose records were all enqueued.
    pub files_completed: u64,
    /// Files whose task aborted.
    pub files_failed: u64,
    /// Records enqueued with the broker.
    pub records_published: u64,
    /// Records the broker failed to deliver.
    pub delivery_failures: u64,
}

impl StatsSnapshot {
    /// Files dispatched but not yet finished either way.
    #[must_use]
    pub const fn files_in_flight(&self) -> u64 {
        self.files_dispatched
            .saturating_sub(self.files_completed + self.files_failed)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files dispatched ({} completed, {} failed), {} records published, {} delivery failures",
            self.files_dispatched,
            self.files_completed,
            self.files_failed,
            self.records_published,
            self.delivery_failures,
        )
    }
}
