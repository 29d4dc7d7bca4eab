//! # SensorCache - Sensor telemetry cache and aggregation engine
//!
//! An in-memory, write-through cache of sensor readings with daily and weekly
//! aggregation, periodic persistence and retention cleanup.
//!
//! ## Key Features
//!
//! - **Hour buckets**: readings grouped per sensor, per date, per hour
//! - **Queued or direct ingestion**: publish to a transport or merge in place
//! - **Aggregation**: daily and weekly min/max/average over retained dates
//! - **Scheduled jobs**: periodic flush to storage and retention cleanup
//! - **Admission control**: bounded concurrency with per-request deadline
//!
//! ## Quick Start
//!
//! ```rust
//! use sensorcache::{aggregate, Reading, RetentionCache};
//!
//! let mut cache = RetentionCache::new();
//! cache.merge(&Reading::new("s1", "10-18-2026", 10, 21));
//! cache.merge(&Reading::new("s1", "10-18-2026", 10, 25));
//! cache.merge(&Reading::new("s1", "10-18-2026", 14, 19));
//!
//! assert_eq!(aggregate::daily_max(&cache, "s1", "10-18-2026").unwrap(), 25);
//! assert_eq!(aggregate::daily_min(&cache, "s1", "10-18-2026").unwrap(), 19);
//! ```
//!
//! ## Modules
//!
//! - [`record`]: Sensor records, hour buckets and readings
//! - [`cache`]: The retention cache and warm-up
//! - [`aggregate`]: Daily and weekly aggregation
//! - [`ingest`]: Direct and queued ingestion
//! - [`scheduler`]: Flush and cleanup jobs
//! - [`store`]: Persistence gateway
//! - [`transport`]: Message transport abstraction
//! - [`service`]: The [`TelemetryService`] facade

// Modules
pub mod admission;
pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod record;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod stats;
pub mod store;
pub mod transport;

// Re-exports for convenient access
pub use admission::AdmissionControl;
pub use aggregate::DailySummary;
pub use cache::{RetentionCache, SharedCache, WarmUpReport};
pub use config::{IngestMode, ServiceConfig};
pub use error::{Result, TelemetryError};
pub use ingest::{run_consumer, Ingestor, QueuePublisher};
pub use record::{
    format_date, parse_date, HourBucket, Reading, SensorId, SensorRecord, Temperature,
    DATE_FORMAT,
};
pub use scheduler::{CleanupJob, CleanupReport, FlushJob, FlushReport};
pub use service::TelemetryService;
pub use shutdown::{ShutdownListener, ShutdownSignal};
pub use stats::{ServiceStats, StatsSnapshot};
pub use store::{FsStore, MemoryStore, SensorStore, DEFAULT_STORE_DIR};
pub use transport::{MemoryQueue, MessageTransport, QueueConsumer, TransportMetrics};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_basic_merge_and_aggregate() {
        let mut cache = RetentionCache::new();
        cache.merge(&Reading::new("s1", "10-18-2026", 7, 18));
        cache.merge(&Reading::new("s1", "10-18-2026", 8, 22));

        assert_eq!(aggregate::daily_max(&cache, "s1", "10-18-2026").unwrap(), 22);
        assert_eq!(aggregate::weekly_min(&cache, "s1").unwrap(), 18);
    }
}
