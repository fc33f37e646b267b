//! Diagnostic counters and the rolling event log.
//!
//! Stale-handle operations and invalid type ids are skipped silently by the
//! structural phase; the counters here are how host tooling observes them.
//! System failures additionally append a record to a bounded rolling log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

const LOG_CAPACITY: usize = 256;

/// One entry of the rolling diagnostic log.
#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    /// Frame counter at the time the event was recorded.
    pub frame: u64,
    pub message: String,
}

/// Counters for silently-handled conditions plus a rolling log of the
/// noteworthy ones. All counters are monotonically increasing for the
/// lifetime of the world.
#[derive(Default)]
pub struct Diagnostics {
    stale_destroys: AtomicU64,
    stale_adds: AtomicU64,
    stale_removes: AtomicU64,
    invalid_type_ops: AtomicU64,
    system_failures: AtomicU64,
    log: Mutex<VecDeque<DiagnosticRecord>>,
}

impl Diagnostics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Destroys that targeted an already-dead entity.
    pub fn stale_destroys(&self) -> u64 {
        self.stale_destroys.load(Ordering::Relaxed)
    }

    /// Component adds skipped because the entity was no longer alive.
    pub fn stale_adds(&self) -> u64 {
        self.stale_adds.load(Ordering::Relaxed)
    }

    /// Component removes skipped because the entity was no longer alive.
    pub fn stale_removes(&self) -> u64 {
        self.stale_removes.load(Ordering::Relaxed)
    }

    /// Operations referencing a type id outside the registered range.
    pub fn invalid_type_ops(&self) -> u64 {
        self.invalid_type_ops.load(Ordering::Relaxed)
    }

    /// Systems that panicked or returned an error.
    pub fn system_failures(&self) -> u64 {
        self.system_failures.load(Ordering::Relaxed)
    }

    /// Clone out the rolling log, oldest first.
    pub fn recent(&self) -> Vec<DiagnosticRecord> {
        self.log.lock().iter().cloned().collect()
    }

    pub(crate) fn count_stale_destroy(&self) {
        self.stale_destroys.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_stale_add(&self) {
        self.stale_adds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_stale_remove(&self) {
        self.stale_removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_invalid_type(&self) {
        self.invalid_type_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_system_failure(&self, frame: u64, system: &str, message: &str) {
        self.system_failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(system, "system failed: {message}");
        self.push(frame, format!("system '{system}' failed: {message}"));
    }

    fn push(&self, frame: u64, message: String) {
        let mut log = self.log.lock();
        if log.len() == LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(DiagnosticRecord { frame, message });
    }
}
