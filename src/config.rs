// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for the telemetry service

use std::time::Duration;

use tracing::warn;

use crate::error::{Result, TelemetryError};
use crate::transport::DEFAULT_QUEUE_CAPACITY;

/// How submitted readings reach the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Publish to the message transport; a consumer task merges
    #[default]
    Queued,
    /// Merge on the caller's task
    Direct,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for IngestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IngestMode {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "queued" | "queue" => Ok(Self::Queued),
            "direct" => Ok(Self::Direct),
            other => Err(TelemetryError::InvalidConfig(format!(
                "Unknown ingest mode '{}'",
                other
            ))),
        }
    }
}

/// Service-level configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Period of the flush job
    pub flush_interval: Duration,

    /// Period of the retention cleanup job
    pub cleanup_interval: Duration,

    /// Dates older than this many days are pruned
    pub retention_days: u32,

    /// Concurrent requests admitted (default: 10)
    pub max_in_flight: usize,

    /// Time a request may wait for admission and run; `None` waits forever
    pub request_timeout: Option<Duration>,

    /// Capacity of the in-process queue
    pub queue_capacity: usize,

    /// Ingestion path
    pub ingest_mode: IngestMode,

    /// Save each sensor right after its dates are pruned
    pub persist_on_cleanup: bool,

    /// Run one last flush when the service shuts down
    pub flush_on_shutdown: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(12 * 60 * 60),
            retention_days: 7,
            max_in_flight: 10,
            request_timeout: Some(Duration::from_secs(5)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ingest_mode: IngestMode::Queued,
            persist_on_cleanup: true,
            flush_on_shutdown: true,
        }
    }
}

impl ServiceConfig {
    /// Configuration that merges readings on the caller's task
    pub fn direct() -> Self {
        Self {
            ingest_mode: IngestMode::Direct,
            ..Default::default()
        }
    }

    /// Configuration with a custom admission limit
    pub fn with_max_in_flight(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            ..Default::default()
        }
    }

    /// Reject any out-of-range field
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "flush_interval must be positive".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "cleanup_interval must be positive".to_string(),
            ));
        }
        if self.retention_days == 0 {
            return Err(TelemetryError::InvalidConfig(
                "retention_days must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(TelemetryError::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(TelemetryError::InvalidConfig(
                "request_timeout must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(TelemetryError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Replace every invalid field with its default, logging each fallback
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if self.flush_interval.is_zero() {
            warn!("Invalid flush interval, falling back to default value");
            self.flush_interval = defaults.flush_interval;
        }
        if self.cleanup_interval.is_zero() {
            warn!("Invalid cleanup interval, falling back to default value");
            self.cleanup_interval = defaults.cleanup_interval;
        }
        if self.retention_days == 0 {
            warn!("Invalid retention days, falling back to default value");
            self.retention_days = defaults.retention_days;
        }
        if self.max_in_flight == 0 {
            warn!("Invalid max connections, falling back to default value");
            self.max_in_flight = defaults.max_in_flight;
        }
        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            warn!("Invalid request timeout, falling back to default value");
            self.request_timeout = defaults.request_timeout;
        }
        if self.queue_capacity == 0 {
            warn!("Invalid queue capacity, falling back to default value");
            self.queue_capacity = defaults.queue_capacity;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.cleanup_interval, Duration::from_secs(43_200));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.ingest_mode, IngestMode::Queued);
        assert!(config.persist_on_cleanup);
        assert!(config.flush_on_shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_config_direct() {
        let config = ServiceConfig::direct();
        assert_eq!(config.ingest_mode, IngestMode::Direct);
        assert_eq!(config.max_in_flight, 10);
    }

    #[test]
    fn test_validate_rejects_zero_fields() {
        let config = ServiceConfig::with_max_in_flight(0);
        assert!(matches!(config.validate(), Err(TelemetryError::InvalidConfig(_))));

        let config = ServiceConfig {
            retention_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServiceConfig {
            request_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_timeout_is_valid() {
        let config = ServiceConfig {
            request_timeout: None,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sanitized_falls_back() {
        let config = ServiceConfig {
            flush_interval: Duration::ZERO,
            max_in_flight: 0,
            queue_capacity: 0,
            retention_days: 3,
            ..Default::default()
        }
        .sanitized();

        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.max_in_flight, 10);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.retention_days, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ingest_mode_parse() {
        assert_eq!("direct".parse::<IngestMode>().unwrap(), IngestMode::Direct);
        assert_eq!("Queued".parse::<IngestMode>().unwrap(), IngestMode::Queued);
        assert!("carrier-pigeon".parse::<IngestMode>().is_err());
    }
}
