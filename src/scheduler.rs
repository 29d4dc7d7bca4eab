// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scheduled jobs
//!
//! Two periodic jobs keep storage and the cache in shape:
//!
//! - **Flush**: snapshot the cache under the lock, release it, then save every
//!   record. A failed save is logged and retried on the next tick.
//! - **Cleanup**: drop dates that start before `now - retention_days`. Each
//!   sensor is pruned (and optionally saved) under its own lock acquisition.
//!
//! Store writes run on the blocking pool.
//!
//! Both fire first one period after start and skip missed ticks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Local, NaiveDateTime};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::record::SensorId;
use crate::shutdown::ShutdownListener;
use crate::stats::ServiceStats;
use crate::store::{save_blocking, SensorStore};

/// Outcome of one flush pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: Vec<SensorId>,
}

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub cutoff: Option<NaiveDateTime>,
    pub sensors_checked: usize,
    pub dates_removed: usize,
    pub sensors_pruned: Vec<SensorId>,
    pub save_failures: Vec<SensorId>,
}

/// `now - retention_days`; dates starting before this instant are pruned
pub fn retention_cutoff(now: NaiveDateTime, retention_days: u32) -> NaiveDateTime {
    now.checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDateTime::MIN)
}

/// Save every cached record once
pub async fn flush_once(
    cache: &SharedCache,
    store: &Arc<dyn SensorStore>,
    stats: &ServiceStats,
) -> FlushReport {
    let snapshot = cache.lock().await.snapshot();
    let mut report = FlushReport::default();

    for record in snapshot {
        let saved = match record.to_json() {
            Ok(bytes) => save_blocking(store, &record.id, bytes).await,
            Err(e) => Err(e),
        };
        match saved {
            Ok(()) => report.saved += 1,
            Err(e) => {
                warn!("Could not flush sensor {}: {}", record.id, e);
                report.failed.push(record.id);
            }
        }
    }

    stats.record_flush(report.saved, report.failed.len());
    debug!(
        "Flush: {} records saved, {} failed",
        report.saved,
        report.failed.len()
    );
    report
}

/// Prune every sensor's dates that start strictly before the retention
/// cutoff.
///
/// With a store, each pruned record is saved before that sensor's lock is
/// released.
pub async fn cleanup_once(
    cache: &SharedCache,
    store: Option<&Arc<dyn SensorStore>>,
    now: NaiveDateTime,
    retention_days: u32,
    stats: &ServiceStats,
) -> CleanupReport {
    let cutoff = retention_cutoff(now, retention_days);
    let sensor_ids = cache.lock().await.sensor_ids();
    let mut report = CleanupReport {
        cutoff: Some(cutoff),
        sensors_checked: sensor_ids.len(),
        ..Default::default()
    };

    for sensor_id in sensor_ids {
        let mut guard = cache.lock().await;
        let removed = match guard.delete_dates_before(&sensor_id, cutoff) {
            Ok(removed) => removed,
            Err(e) => {
                debug!("Skipping cleanup of {}: {}", sensor_id, e);
                continue;
            }
        };
        if removed.is_empty() {
            continue;
        }
        debug!("Pruned {} dates from sensor {}", removed.len(), sensor_id);
        report.dates_removed += removed.len();

        let encoded = match (store, guard.get(&sensor_id)) {
            (Some(store), Some(record)) => Some((store, record.to_json())),
            _ => None,
        };
        if let Some((store, encoded)) = encoded {
            let saved = match encoded {
                Ok(bytes) => save_blocking(store, &sensor_id, bytes).await,
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                warn!("Could not save sensor {} after cleanup: {}", sensor_id, e);
                report.save_failures.push(sensor_id.clone());
            }
        }
        drop(guard);
        report.sensors_pruned.push(sensor_id);
    }

    stats.record_cleanup(report.dates_removed);
    info!(
        "Cleanup before {}: {} dates removed across {} sensors",
        cutoff,
        report.dates_removed,
        report.sensors_pruned.len()
    );
    report
}

fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Periodic flush of the cache to storage
pub struct FlushJob {
    cache: SharedCache,
    store: Arc<dyn SensorStore>,
    stats: Arc<ServiceStats>,
    period: Duration,
}

impl FlushJob {
    pub fn new(
        cache: SharedCache,
        store: Arc<dyn SensorStore>,
        stats: Arc<ServiceStats>,
        period: Duration,
    ) -> Self {
        Self {
            cache,
            store,
            stats,
            period,
        }
    }

    /// Spawn the job; it stops when `shutdown` fires
    pub fn start(self, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting flush job with interval: {:?}", self.period);
            let mut interval = ticker(self.period);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = interval.tick() => {
                        flush_once(&self.cache, &self.store, &self.stats).await;
                    }
                }
            }
            info!("Flush job stopped");
        })
    }
}

/// Periodic retention cleanup
pub struct CleanupJob {
    cache: SharedCache,
    store: Option<Arc<dyn SensorStore>>,
    stats: Arc<ServiceStats>,
    period: Duration,
    retention_days: u32,
    clock: fn() -> NaiveDateTime,
}

impl CleanupJob {
    /// `store` is `Some` to save each pruned record right away
    pub fn new(
        cache: SharedCache,
        store: Option<Arc<dyn SensorStore>>,
        stats: Arc<ServiceStats>,
        period: Duration,
        retention_days: u32,
    ) -> Self {
        Self {
            cache,
            store,
            stats,
            period,
            retention_days,
            clock: local_now,
        }
    }

    /// Use another wall clock
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the job; it stops when `shutdown` fires
    pub fn start(self, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Starting cleanup job with interval: {:?}, retention: {} days",
                self.period, self.retention_days
            );
            let mut interval = ticker(self.period);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = interval.tick() => {
                        cleanup_once(
                            &self.cache,
                            self.store.as_ref(),
                            (self.clock)(),
                            self.retention_days,
                            &self.stats,
                        )
                        .await;
                    }
                }
            }
            info!("Cleanup job stopped");
        })
    }
}
