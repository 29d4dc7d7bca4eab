// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! High-level service API
//!
//! [`TelemetryService`] owns the shared cache, the ingestion path, admission
//! control and the background jobs. Nothing is global: everything hangs off
//! the value returned by [`TelemetryService::start`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensorcache::{MemoryStore, ServiceConfig, TelemetryService};
//!
//! # async fn demo() -> sensorcache::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let service = TelemetryService::with_memory_queue(ServiceConfig::default(), store).await?;
//!
//! service.submit("greenhouse-1", 21).await?;
//! let hottest = service.weekly_max("greenhouse-1").await;
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::admission::AdmissionControl;
use crate::aggregate::{self, DailySummary};
use crate::cache::{RetentionCache, SharedCache, WarmUpReport};
use crate::config::{IngestMode, ServiceConfig};
use crate::error::{Result, TelemetryError};
use crate::ingest::{run_consumer, Ingestor, QueuePublisher};
use crate::record::{parse_date, Reading, Temperature};
use crate::scheduler::{self, CleanupJob, CleanupReport, FlushJob, FlushReport};
use crate::shutdown::ShutdownSignal;
use crate::stats::{ServiceStats, StatsSnapshot};
use crate::store::SensorStore;
use crate::transport::{MemoryQueue, MessageTransport, TransportMetrics};

/// The running telemetry engine
pub struct TelemetryService {
    config: ServiceConfig,
    cache: SharedCache,
    store: Arc<dyn SensorStore>,
    stats: Arc<ServiceStats>,
    ingestor: Ingestor,
    publisher: Option<QueuePublisher>,
    admission: Arc<AdmissionControl>,
    shutdown: ShutdownSignal,
    jobs: Mutex<Vec<JoinHandle<()>>>,
    consumer: Mutex<Option<JoinHandle<u64>>>,
    warm_up: WarmUpReport,
    started_at: Instant,
}

impl TelemetryService {
    /// Warm the cache from `store`, then start the scheduled jobs and, in
    /// queued mode with a transport, the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Fatal`] if the store cannot list its
    /// sensors.
    pub async fn start(
        config: ServiceConfig,
        store: Arc<dyn SensorStore>,
        transport: Option<Arc<dyn MessageTransport>>,
    ) -> Result<Self> {
        let config = config.sanitized();
        let stats = Arc::new(ServiceStats::new());

        let loader = Arc::clone(&store);
        let (cache, report) =
            tokio::task::spawn_blocking(move || RetentionCache::warm_up(loader.as_ref()))
                .await
                .map_err(|e| TelemetryError::Fatal(format!("Warm-up task failed: {}", e)))??;
        stats.record_warm_up(report.loaded, report.skipped.len());
        let cache = cache.into_shared();

        let ingestor = Ingestor::new(cache.clone(), stats.clone());
        let shutdown = ShutdownSignal::new();

        let (publisher, consumer) = match (config.ingest_mode, transport) {
            (IngestMode::Queued, Some(transport)) => {
                let queue_consumer = transport.consume()?;
                let handle = tokio::spawn(run_consumer(
                    queue_consumer,
                    ingestor.clone(),
                    shutdown.listener(),
                ));
                (
                    Some(QueuePublisher::new(transport, stats.clone())),
                    Some(handle),
                )
            }
            (IngestMode::Queued, None) => {
                warn!("Queued ingestion requested without a transport, ingesting directly");
                (None, None)
            }
            (IngestMode::Direct, _) => (None, None),
        };

        let jobs = vec![
            FlushJob::new(
                cache.clone(),
                store.clone(),
                stats.clone(),
                config.flush_interval,
            )
            .start(shutdown.listener()),
            CleanupJob::new(
                cache.clone(),
                config.persist_on_cleanup.then(|| store.clone()),
                stats.clone(),
                config.cleanup_interval,
                config.retention_days,
            )
            .start(shutdown.listener()),
        ];

        let admission = Arc::new(
            AdmissionControl::new(config.max_in_flight, config.request_timeout)
                .with_stats(stats.clone()),
        );

        info!(
            "Telemetry service started: {} sensors cached, {} ingestion",
            report.loaded,
            if publisher.is_some() { "queued" } else { "direct" }
        );

        Ok(Self {
            config,
            cache,
            store,
            stats,
            ingestor,
            publisher,
            admission,
            shutdown,
            jobs: Mutex::new(jobs),
            consumer: Mutex::new(consumer),
            warm_up: report,
            started_at: Instant::now(),
        })
    }

    /// Start with an in-process queue sized by `config.queue_capacity`
    pub async fn with_memory_queue(
        config: ServiceConfig,
        store: Arc<dyn SensorStore>,
    ) -> Result<Self> {
        let queue: Arc<dyn MessageTransport> =
            Arc::new(MemoryQueue::with_capacity(config.queue_capacity));
        Self::start(config, store, Some(queue)).await
    }

    /// Record a value for `sensor_id` stamped with the local wall clock
    pub async fn submit(&self, sensor_id: &str, temp: Temperature) -> Result<()> {
        self.submit_at(sensor_id, Local::now().naive_local(), temp)
            .await
    }

    /// Record a value stamped with `timestamp`.
    ///
    /// In queued mode this returns once the transport accepted the message;
    /// the value becomes visible to queries after the consumer merged it.
    /// Fails with [`TelemetryError::Transient`] once shutdown has begun.
    pub async fn submit_at(
        &self,
        sensor_id: &str,
        timestamp: NaiveDateTime,
        temp: Temperature,
    ) -> Result<()> {
        self.ensure_accepting()?;
        let reading = Reading::at(sensor_id, timestamp, temp);
        match &self.publisher {
            Some(publisher) => publisher.publish(&reading),
            None => self.ingestor.ingest(&reading).await,
        }
    }

    /// Merge a reading on the caller's task, bypassing the queue
    pub async fn ingest_direct(&self, reading: &Reading) -> Result<()> {
        self.ensure_accepting()?;
        self.ingestor.ingest(reading).await
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.shutdown.is_triggered() {
            return Err(TelemetryError::Transient(
                "Service is shutting down".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn daily_max(&self, sensor_id: &str, date: &str) -> Result<Temperature> {
        parse_date(date)?;
        aggregate::daily_max(&*self.cache.lock().await, sensor_id, date)
    }

    pub async fn daily_min(&self, sensor_id: &str, date: &str) -> Result<Temperature> {
        parse_date(date)?;
        aggregate::daily_min(&*self.cache.lock().await, sensor_id, date)
    }

    pub async fn daily_avg(&self, sensor_id: &str, date: &str) -> Result<f64> {
        parse_date(date)?;
        aggregate::daily_avg(&*self.cache.lock().await, sensor_id, date)
    }

    pub async fn daily_summary(&self, sensor_id: &str, date: &str) -> Result<DailySummary> {
        parse_date(date)?;
        aggregate::daily_summary(&*self.cache.lock().await, sensor_id, date)
    }

    pub async fn weekly_max(&self, sensor_id: &str) -> Result<Temperature> {
        aggregate::weekly_max(&*self.cache.lock().await, sensor_id)
    }

    pub async fn weekly_min(&self, sensor_id: &str) -> Result<Temperature> {
        aggregate::weekly_min(&*self.cache.lock().await, sensor_id)
    }

    pub async fn weekly_avg(&self, sensor_id: &str) -> Result<f64> {
        aggregate::weekly_avg(&*self.cache.lock().await, sensor_id)
    }

    /// Run one flush pass now
    pub async fn flush_now(&self) -> FlushReport {
        scheduler::flush_once(&self.cache, &self.store, &self.stats).await
    }

    /// Run one cleanup pass now as if the wall clock read `now`
    pub async fn cleanup_now(&self, now: NaiveDateTime) -> CleanupReport {
        let store = self.config.persist_on_cleanup.then_some(&self.store);
        scheduler::cleanup_once(
            &self.cache,
            store,
            now,
            self.config.retention_days,
            &self.stats,
        )
        .await
    }

    pub async fn cached_sensor_count(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }

    pub fn transport_metrics(&self) -> Option<TransportMetrics> {
        self.publisher.as_ref().map(|p| p.transport().metrics())
    }

    pub fn ingest_mode(&self) -> IngestMode {
        if self.publisher.is_some() {
            IngestMode::Queued
        } else {
            IngestMode::Direct
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn warm_up_report(&self) -> &WarmUpReport {
        &self.warm_up
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Refuse new readings, stop the background tasks, merge whatever is
    /// still queued, then run the final flush if enabled. Safe to call more
    /// than once.
    pub async fn shutdown(&self) -> Option<FlushReport> {
        info!("Shutting down telemetry service");
        self.shutdown.trigger();
        // A publish racing the trigger either lands before this and is
        // drained below, or is rejected by the transport
        if let Some(publisher) = &self.publisher {
            publisher.transport().close();
        }

        let jobs = std::mem::take(&mut *self.jobs.lock().unwrap_or_else(PoisonError::into_inner));
        for job in jobs {
            if let Err(e) = job.await {
                warn!("Background job ended abnormally: {}", e);
            }
        }

        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = consumer {
            match handle.await {
                Ok(merged) => info!("Consumer merged {} messages", merged),
                Err(e) => warn!("Consumer ended abnormally: {}", e),
            }
        }
        self.drain_queue().await;

        if self.config.flush_on_shutdown {
            let report = self.flush_now().await;
            info!("Final flush: {} records saved", report.saved);
            Some(report)
        } else {
            None
        }
    }

    async fn drain_queue(&self) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let mut consumer = match publisher.transport().consume() {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!("Could not drain queue: {}", e);
                return;
            }
        };
        let mut drained = 0usize;
        while let Some(payload) = consumer.try_next() {
            if self.ingestor.handle_message(&payload).await.is_ok() {
                drained += 1;
            }
        }
        if drained > 0 {
            info!("Merged {} queued messages during shutdown", drained);
        }
    }
}
