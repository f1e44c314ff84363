//! Optional, process-local performance counters for a sink or source.
//!
//! Purely a diagnostic surface: nothing here crosses the shared-memory
//! boundary or costs anything beyond a few relaxed atomic increments on
//! the paths that already touch a ring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one [`crate::sink::RecordSink`].
#[derive(Debug, Default)]
pub struct SinkMetrics {
    records_pushed: AtomicU64,
    records_dropped: AtomicU64,
    sla_exceeded_pushed: AtomicU64,
    sla_exceeded_dropped: AtomicU64,
}

/// A point-in-time copy of a [`SinkMetrics`], cheap to pass around.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkMetricsSnapshot {
    pub records_pushed: u64,
    pub records_dropped: u64,
    pub sla_exceeded_pushed: u64,
    pub sla_exceeded_dropped: u64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pushed(&self) {
        self.records_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sla_exceeded_pushed(&self) {
        self.sla_exceeded_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sla_exceeded_dropped(&self) {
        self.sla_exceeded_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SinkMetricsSnapshot {
        SinkMetricsSnapshot {
            records_pushed: self.records_pushed.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            sla_exceeded_pushed: self.sla_exceeded_pushed.load(Ordering::Relaxed),
            sla_exceeded_dropped: self.sla_exceeded_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Running counters for one [`crate::source::RecordSource`].
#[derive(Debug, Default)]
pub struct SourceMetrics {
    channels_discovered: AtomicU64,
    channels_reaped: AtomicU64,
    records_popped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceMetricsSnapshot {
    pub channels_discovered: u64,
    pub channels_reaped: u64,
    pub records_popped: u64,
}

impl SourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn channel_discovered(&self) {
        self.channels_discovered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn channel_reaped(&self) {
        self.channels_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_popped(&self) {
        self.records_popped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SourceMetricsSnapshot {
        SourceMetricsSnapshot {
            channels_discovered: self.channels_discovered.load(Ordering::Relaxed),
            channels_reaped: self.channels_reaped.load(Ordering::Relaxed),
            records_popped: self.records_popped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_metrics_snapshot_reflects_increments() {
        let metrics = SinkMetrics::new();
        metrics.record_pushed();
        metrics.record_pushed();
        metrics.record_dropped();
        metrics.sla_exceeded_pushed();

        let snap = metrics.snapshot();
        assert_eq!(snap.records_pushed, 2);
        assert_eq!(snap.records_dropped, 1);
        assert_eq!(snap.sla_exceeded_pushed, 1);
        assert_eq!(snap.sla_exceeded_dropped, 0);
    }

    #[test]
    fn test_source_metrics_snapshot_reflects_increments() {
        let metrics = SourceMetrics::new();
        metrics.channel_discovered();
        metrics.channel_discovered();
        metrics.channel_reaped();
        metrics.record_popped();

        let snap = metrics.snapshot();
        assert_eq!(snap.channels_discovered, 2);
        assert_eq!(snap.channels_reaped, 1);
        assert_eq!(snap.records_popped, 1);
    }
}
