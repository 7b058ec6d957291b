//! Instrumentation call-outs
//!
//! Lock acquisition outcomes, lockdown hits and commits are reported to an
//! external metrics collaborator through [`Instrumentation`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics sink for the tree core
pub trait Instrumentation: Send + Sync {
    /// One lock request finished (`batched` = via the lock collection)
    fn on_acquire_lock(&self, batched: bool, succeeded: bool, level: usize, elapsed: Duration);

    /// A request touched a lockdown path
    fn on_lockdown_access(&self, path: &str, rw: bool);

    /// A change list was handed to replication
    fn on_tx_committed(&self);
}

/// Default sink: structured log lines only
#[derive(Debug, Default)]
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn on_acquire_lock(&self, batched: bool, succeeded: bool, level: usize, elapsed: Duration) {
        if succeeded {
            tracing::trace!(batched, level, elapsed_us = elapsed.as_micros() as u64, "lock acquired");
        } else {
            tracing::warn!(batched, level, elapsed_ms = elapsed.as_millis() as u64, "lock acquisition timed out");
        }
    }

    fn on_lockdown_access(&self, path: &str, rw: bool) {
        tracing::warn!(path, rw, "access to lockdown path rejected");
    }

    fn on_tx_committed(&self) {
        tracing::trace!("transaction committed");
    }
}

/// Counting sink for lock and timeout totals
#[derive(Debug, Default)]
pub struct CountingInstrumentation {
    acquired: AtomicU64,
    batched_acquired: AtomicU64,
    failed: AtomicU64,
    lockdown_hits: AtomicU64,
    commits: AtomicU64,
}

impl CountingInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful acquisitions (direct + batched)
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Successful acquisitions made by a lock collection
    pub fn batched_acquired(&self) -> u64 {
        self.batched_acquired.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn lockdown_hits(&self) -> u64 {
        self.lockdown_hits.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }
}

impl Instrumentation for CountingInstrumentation {
    fn on_acquire_lock(&self, batched: bool, succeeded: bool, _level: usize, _elapsed: Duration) {
        if !succeeded {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        if batched {
            self.batched_acquired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_lockdown_access(&self, _path: &str, _rw: bool) {
        self.lockdown_hits.fetch_add(1, Ordering::SeqCst);
    }

    fn on_tx_committed(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }
}
