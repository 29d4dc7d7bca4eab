// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Service counters
//!
//! Lock-free counters updated by the request path, the consumer and the
//! scheduled jobs. The server copies a [`StatsSnapshot`] into its Prometheus
//! registry at scrape time.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters of one service instance
#[derive(Debug, Default)]
pub struct ServiceStats {
    readings_ingested: AtomicU64,
    readings_published: AtomicU64,
    publish_failures: AtomicU64,
    malformed_dropped: AtomicU64,
    flushes: AtomicU64,
    records_flushed: AtomicU64,
    flush_failures: AtomicU64,
    cleanups: AtomicU64,
    dates_pruned: AtomicU64,
    admission_rejected: AtomicU64,
    warmup_loaded: AtomicU64,
    warmup_skipped: AtomicU64,
}

/// Point-in-time copy of [`ServiceStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub readings_ingested: u64,
    pub readings_published: u64,
    pub publish_failures: u64,
    pub malformed_dropped: u64,
    pub flushes: u64,
    pub records_flushed: u64,
    pub flush_failures: u64,
    pub cleanups: u64,
    pub dates_pruned: u64,
    pub admission_rejected: u64,
    pub warmup_loaded: u64,
    pub warmup_skipped: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingested(&self) {
        bump(&self.readings_ingested, 1);
    }

    pub fn record_published(&self) {
        bump(&self.readings_published, 1);
    }

    pub fn record_publish_failure(&self) {
        bump(&self.publish_failures, 1);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed_dropped, 1);
    }

    /// One flush pass finished with `saved` records written and `failed` skipped
    pub fn record_flush(&self, saved: usize, failed: usize) {
        bump(&self.flushes, 1);
        bump(&self.records_flushed, saved as u64);
        bump(&self.flush_failures, failed as u64);
    }

    pub fn record_cleanup(&self, pruned: usize) {
        bump(&self.cleanups, 1);
        bump(&self.dates_pruned, pruned as u64);
    }

    pub fn record_admission_rejected(&self) {
        bump(&self.admission_rejected, 1);
    }

    pub fn record_warm_up(&self, loaded: usize, skipped: usize) {
        bump(&self.warmup_loaded, loaded as u64);
        bump(&self.warmup_skipped, skipped as u64);
    }

    pub fn readings_ingested(&self) -> u64 {
        self.readings_ingested.load(Ordering::Relaxed)
    }

    pub fn malformed_dropped(&self) -> u64 {
        self.malformed_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            readings_ingested: load(&self.readings_ingested),
            readings_published: load(&self.readings_published),
            publish_failures: load(&self.publish_failures),
            malformed_dropped: load(&self.malformed_dropped),
            flushes: load(&self.flushes),
            records_flushed: load(&self.records_flushed),
            flush_failures: load(&self.flush_failures),
            cleanups: load(&self.cleanups),
            dates_pruned: load(&self.dates_pruned),
            admission_rejected: load(&self.admission_rejected),
            warmup_loaded: load(&self.warmup_loaded),
            warmup_skipped: load(&self.warmup_skipped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = ServiceStats::new();
        stats.record_ingested();
        stats.record_ingested();
        stats.record_malformed();
        stats.record_flush(3, 1);
        stats.record_flush(2, 0);
        stats.record_cleanup(4);

        let snap = stats.snapshot();
        assert_eq!(snap.readings_ingested, 2);
        assert_eq!(snap.malformed_dropped, 1);
        assert_eq!(snap.flushes, 2);
        assert_eq!(snap.records_flushed, 5);
        assert_eq!(snap.flush_failures, 1);
        assert_eq!(snap.cleanups, 1);
        assert_eq!(snap.dates_pruned, 4);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = ServiceStats::new();
        stats.record_warm_up(5, 1);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["warmup_loaded"], 5);
        assert_eq!(json["warmup_skipped"], 1);
    }
}
