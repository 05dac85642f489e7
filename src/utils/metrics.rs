//! Observability and Metrics
//!
//! Counters for the puzzle gate, shared between the listener and every
//! connection handler of one server instance.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Connections currently being handled
    pub connections_active: AtomicU64,
    /// Puzzles issued and registered
    pub puzzles_issued: AtomicU64,
    /// Puzzles redeemed for the resource
    pub resources_granted: AtomicU64,
    /// Redemptions refused: unknown, expired or incorrect headers
    pub rejections: AtomicU64,
    /// Connections that hit their read deadline
    pub timeouts: AtomicU64,
    /// Malformed messages, unexpected commands and internal failures
    pub protocol_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            puzzles_issued: AtomicU64::new(0),
            resources_granted: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn puzzle_issued(&self) {
        self.puzzles_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resource_granted(&self) {
        self.resources_granted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            puzzles_issued: self.puzzles_issued.load(Ordering::Relaxed),
            resources_granted: self.resources_granted.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            puzzles_issued = snapshot.puzzles_issued,
            resources_granted = snapshot.resources_granted,
            rejections = snapshot.rejections,
            timeouts = snapshot.timeouts,
            protocol_errors = snapshot.protocol_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Gate metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub puzzles_issued: u64,
    pub resources_granted: u64,
    pub rejections: u64,
    pub timeouts: u64,
    pub protocol_errors: u64,
    pub uptime_seconds: u64,
}

/// Logs how long an operation took when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.connection_established();
        metrics.connection_established();
        metrics.connection_closed();
        metrics.puzzle_issued();
        metrics.resource_granted();
        metrics.rejection();
        metrics.timeout();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.connections_active, 1);
        assert_eq!(snapshot.puzzles_issued, 1);
        assert_eq!(snapshot.resources_granted, 1);
        assert_eq!(snapshot.rejections, 1);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.protocol_errors, 0);
    }
}
