//! Worker counters and the statistics snapshot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

use crate::pool::PoolStats;

/// Gauges and counters of one worker.
///
/// Mutated only on the worker's own context; shared through an `Arc` so
/// other threads can read them while it runs.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    queued: AtomicUsize,
    retrying: AtomicUsize,
    active: AtomicUsize,
    dropped: AtomicU64,
    finished: AtomicU64,
    finished_time_ms: AtomicU64,
}

impl WorkerMetrics {
    /// Statements waiting in the admission queue.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Statements waiting in the retry queue.
    pub fn retrying(&self) -> usize {
        self.retrying.load(Ordering::Relaxed)
    }

    /// Statements running on connections.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Statements rejected at admission.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Statements completed.
    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }

    /// Sum of send-to-finish times, in milliseconds.
    pub fn finished_time_ms(&self) -> u64 {
        self.finished_time_ms.load(Ordering::Relaxed)
    }

    pub(crate) fn add_queued(&self, n: usize) {
        self.queued.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn sub_queued(&self, n: usize) {
        self.queued.fetch_sub(n, Ordering::Relaxed);
    }

    pub(crate) fn add_retrying(&self, n: usize) {
        self.retrying.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn sub_retrying(&self, n: usize) {
        self.retrying.fetch_sub(n, Ordering::Relaxed);
    }

    pub(crate) fn add_active(&self, n: usize) {
        self.active.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn sub_active(&self, n: usize) {
        self.active.fetch_sub(n, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: usize) {
        self.dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_finished(&self, n: usize, elapsed_ms: u64) {
        self.finished.fetch_add(n as u64, Ordering::Relaxed);
        self.finished_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }
}

/// Snapshot returned by [`Worker::stats`](crate::Worker::stats).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub name: String,
    pub queued: usize,
    pub retrying: usize,
    pub dropped: u64,
    pub active: usize,
    pub finished: u64,
    pub finished_time_total_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<PoolStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<PoolStats>,
}

impl WorkerStats {
    pub(crate) fn from_metrics(name: &str, metrics: &WorkerMetrics) -> Self {
        Self {
            name: name.to_string(),
            queued: metrics.queued(),
            retrying: metrics.retrying(),
            dropped: metrics.dropped(),
            active: metrics.active(),
            finished: metrics.finished(),
            finished_time_total_ms: metrics.finished_time_ms(),
            primary: None,
            secondary: None,
        }
    }
}
