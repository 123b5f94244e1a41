//! Consumer counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the supervisor and every dispatcher of one consumer
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Deliveries handed to the handler
    delivered: AtomicU64,
    /// Deliveries acknowledged
    acked: AtomicU64,
    /// Deliveries rejected with requeue
    rejected: AtomicU64,
    /// Ack/reject calls the broker did not accept
    ack_failures: AtomicU64,
    /// Connect calls made by the reconnect loop
    reconnect_attempts: AtomicU64,
    /// Successful reconnects
    reconnects: AtomicU64,
    /// Errors swallowed during teardown
    teardown_failures: AtomicU64,
    /// Close-notification streams drained to close after teardown
    streams_drained: AtomicU64,
}

impl ConsumerMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn inc_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_failures(&self) -> u64 {
        self.ack_failures.load(Ordering::Relaxed)
    }

    pub fn inc_ack_failures(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn inc_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn inc_reconnects(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn teardown_failures(&self) -> u64 {
        self.teardown_failures.load(Ordering::Relaxed)
    }

    pub fn add_teardown_failures(&self, count: usize) {
        self.teardown_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn streams_drained(&self) -> u64 {
        self.streams_drained.load(Ordering::Relaxed)
    }

    pub fn add_streams_drained(&self, count: u64) {
        self.streams_drained.fetch_add(count, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            delivered: self.delivered(),
            acked: self.acked(),
            rejected: self.rejected(),
            ack_failures: self.ack_failures(),
            reconnect_attempts: self.reconnect_attempts(),
            reconnects: self.reconnects(),
            teardown_failures: self.teardown_failures(),
            streams_drained: self.streams_drained(),
        }
    }
}

/// Snapshot of consumer metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub delivered: u64,
    pub acked: u64,
    pub rejected: u64,
    pub ack_failures: u64,
    pub reconnect_attempts: u64,
    pub reconnects: u64,
    pub teardown_failures: u64,
    pub streams_drained: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Consumer Summary ===")?;
        writeln!(f, "Delivered: {}", self.delivered)?;
        writeln!(f, "Acked: {}", self.acked)?;
        writeln!(f, "Rejected (requeued): {}", self.rejected)?;
        writeln!(f, "Ack failures: {}", self.ack_failures)?;
        writeln!(
            f,
            "Reconnects: {} ({} attempts)",
            self.reconnects, self.reconnect_attempts
        )?;
        write!(f, "Teardown failures: {}", self.teardown_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = ConsumerMetrics::new();
        metrics.inc_delivered();
        metrics.inc_delivered();
        metrics.inc_acked();
        metrics.inc_rejected();
        metrics.add_teardown_failures(2);
        metrics.add_streams_drained(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.delivered, 2);
        assert_eq!(snapshot.acked, 1);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.teardown_failures, 2);
        assert_eq!(snapshot.reconnects, 0);
        assert_eq!(snapshot.streams_drained, 2);
    }

    #[test]
    fn test_summary_display() {
        let snapshot = MetricsSnapshot {
            reconnects: 1,
            reconnect_attempts: 3,
            ..Default::default()
        };
        let output = snapshot.to_string();
        assert!(output.contains("Reconnects: 1 (3 attempts)"));
    }
}
