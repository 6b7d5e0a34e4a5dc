//! Orchestrator counters
//!
//! Lock-free atomics, read through [`Metrics::snapshot`]. No exporter lives
//! here; the CLI prints a snapshot after a replay.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    // Build lifecycle
    pub builds_updated: AtomicU64,
    pub transitions_rejected: AtomicU64,

    // Fan-out
    pub builds_triggered: AtomicU64,
    pub trigger_failures: AtomicU64,
    pub builds_collapsed: AtomicU64,
    pub teardowns_started: AtomicU64,
    pub virtual_builds_completed: AtomicU64,

    // Side channels
    pub notifications_dropped: AtomicU64,
    pub events_stopped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            builds_updated: AtomicU64::new(0),
            transitions_rejected: AtomicU64::new(0),
            builds_triggered: AtomicU64::new(0),
            trigger_failures: AtomicU64::new(0),
            builds_collapsed: AtomicU64::new(0),
            teardowns_started: AtomicU64::new(0),
            virtual_builds_completed: AtomicU64::new(0),
            notifications_dropped: AtomicU64::new(0),
            events_stopped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_builds_updated(&self) {
        self.builds_updated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_transitions_rejected(&self) {
        self.transitions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_builds_triggered(&self) {
        self.builds_triggered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_trigger_failures(&self) {
        self.trigger_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_builds_collapsed(&self) {
        self.builds_collapsed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_teardowns_started(&self) {
        self.teardowns_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_virtual_builds_completed(&self) {
        self.virtual_builds_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_notifications_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_events_stopped(&self) {
        self.events_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            builds_updated: self.builds_updated.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            builds_triggered: self.builds_triggered.load(Ordering::Relaxed),
            trigger_failures: self.trigger_failures.load(Ordering::Relaxed),
            builds_collapsed: self.builds_collapsed.load(Ordering::Relaxed),
            teardowns_started: self.teardowns_started.load(Ordering::Relaxed),
            virtual_builds_completed: self.virtual_builds_completed.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            events_stopped: self.events_stopped.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of metrics for reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub builds_updated: u64,
    pub transitions_rejected: u64,
    pub builds_triggered: u64,
    pub trigger_failures: u64,
    pub builds_collapsed: u64,
    pub teardowns_started: u64,
    pub virtual_builds_completed: u64,
    pub notifications_dropped: u64,
    pub events_stopped: u64,
}

impl MetricsSnapshot {
    /// Name/value pairs in a stable order, for tabular output.
    pub fn entries(&self) -> [(&'static str, u64); 9] {
        [
            ("builds_updated", self.builds_updated),
            ("transitions_rejected", self.transitions_rejected),
            ("builds_triggered", self.builds_triggered),
            ("trigger_failures", self.trigger_failures),
            ("builds_collapsed", self.builds_collapsed),
            ("teardowns_started", self.teardowns_started),
            ("virtual_builds_completed", self.virtual_builds_completed),
            ("notifications_dropped", self.notifications_dropped),
            ("events_stopped", self.events_stopped),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent() {
        let metrics = Metrics::new();
        metrics.inc_builds_triggered();
        metrics.inc_builds_triggered();
        metrics.inc_teardowns_started();

        let snap = metrics.snapshot();
        assert_eq!(snap.builds_triggered, 2);
        assert_eq!(snap.teardowns_started, 1);
        assert_eq!(snap.builds_collapsed, 0);
        assert_eq!(snap.entries()[2], ("builds_triggered", 2));
    }
}
