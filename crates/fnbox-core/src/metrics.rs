//! Process-wide atomic counters for invocation outcomes.
//!
//! Counters are bumped silently at the call site. Call [`Metrics::flush`] to
//! emit the current values as a single `tracing::info!` event (e.g. when a
//! batch finishes).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::invocation::InvocationOutcome;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters: no allocations, no locking.
pub struct Metrics {
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cleanup_errors: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            started: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            cleanup_errors: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "started", "counter incremented");
    }

    pub fn inc_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "succeeded", "counter incremented");
    }

    /// Every unsuccessful invocation, timeouts included.
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failed", "counter incremented");
    }

    pub fn inc_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timed_out", "counter incremented");
    }

    pub fn inc_cleanup_errors(&self) {
        self.cleanup_errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cleanup_errors", "counter incremented");
    }

    /// Count a finished invocation under its outcome.
    pub fn observe(&self, outcome: &InvocationOutcome) {
        match outcome {
            InvocationOutcome::Succeeded { .. } => self.inc_succeeded(),
            InvocationOutcome::TimedOut { .. } => {
                self.inc_timed_out();
                self.inc_failed();
            }
            _ => self.inc_failed(),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            started = self.started(),
            succeeded = self.succeeded(),
            failed = self.failed(),
            timed_out = self.timed_out(),
            cleanup_errors = self.cleanup_errors(),
        );
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    pub fn cleanup_errors(&self) -> u64 {
        self.cleanup_errors.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.started.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.timed_out.store(0, Ordering::Relaxed);
        self.cleanup_errors.store(0, Ordering::Relaxed);
    }
}
