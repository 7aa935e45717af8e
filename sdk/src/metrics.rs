//! Counters the client facade aggregates across every transaction handle it
//! hands out. Plain atomics, one struct, a `snapshot()` method — the shape
//! `turn-server/src/statistics.rs` uses for its `Counts<T>`, minus the
//! Prometheus registration: spec.md section 1 scopes "metrics registration"
//! out, but the counters themselves (section 6) are in scope and queryable.

use std::sync::atomic::{AtomicU64, Ordering};

use k23si_txn::CounterSink;

#[derive(Debug, Default)]
pub struct Counters {
    read_ops: AtomicU64,
    write_ops: AtomicU64,
    total_txns: AtomicU64,
    successful_txns: AtomicU64,
    abort_conflicts: AtomicU64,
    abort_too_old: AtomicU64,
    heartbeats: AtomicU64,
}

/// A point-in-time read of every counter, spec.md section 6.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CountersSnapshot {
    pub read_ops: u64,
    pub write_ops: u64,
    pub total_txns: u64,
    pub successful_txns: u64,
    pub abort_conflicts: u64,
    pub abort_too_old: u64,
    pub heartbeats: u64,
}

impl Counters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            read_ops: self.read_ops.load(Ordering::Relaxed),
            write_ops: self.write_ops.load(Ordering::Relaxed),
            total_txns: self.total_txns.load(Ordering::Relaxed),
            successful_txns: self.successful_txns.load(Ordering::Relaxed),
            abort_conflicts: self.abort_conflicts.load(Ordering::Relaxed),
            abort_too_old: self.abort_too_old.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
        }
    }
}

impl CounterSink for Counters {
    fn inc_read_ops(&self) {
        self.read_ops.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_write_ops(&self) {
        self.write_ops.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_total_txns(&self) {
        self.total_txns.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_successful_txns(&self) {
        self.successful_txns.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_abort_conflicts(&self) {
        self.abort_conflicts.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_abort_too_old(&self) {
        self.abort_too_old.fetch_add(1, Ordering::Relaxed);
    }
    fn inc_heartbeats(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }
}
