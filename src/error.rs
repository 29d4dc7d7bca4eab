//! Error types for SensorCache
//!
//! One taxonomy covers the whole engine: reads that find nothing, inbound
//! payloads that cannot be decoded, storage/transport failures that the next
//! scheduled tick will retry, and the single startup failure that is fatal.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for SensorCache operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Main error type for SensorCache operations
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Sensor (or the requested date of that sensor) has no stored readings
    #[error("No entry for sensor '{sensor_id}'{}", .date.as_ref().map(|d| format!(" and date '{d}'")).unwrap_or_default())]
    NotFound {
        sensor_id: String,
        date: Option<String>,
    },

    /// A date entry exists but holds no values
    #[error("Date '{date}' of sensor '{sensor_id}' holds no readings")]
    EmptyDate { sensor_id: String, date: String },

    /// Undecodable or invalid inbound payload; dropped, never retried
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// Storage or transport failure; state is unchanged and the next tick retries
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Storage I/O failure
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON encoding/decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The service cannot start (sensor enumeration failed)
    #[error("Fatal: {0}")]
    Fatal(String),

    /// Admission control or processing did not complete in time
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TelemetryError {
    /// Build a `NotFound` for a whole sensor
    pub fn sensor_not_found(sensor_id: impl Into<String>) -> Self {
        Self::NotFound {
            sensor_id: sensor_id.into(),
            date: None,
        }
    }

    /// Build a `NotFound` for one date of a sensor
    pub fn date_not_found(sensor_id: impl Into<String>, date: impl Into<String>) -> Self {
        Self::NotFound {
            sensor_id: sensor_id.into(),
            date: Some(date.into()),
        }
    }

    /// True for read misses (`NotFound` and `EmptyDate`)
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::EmptyDate { .. })
    }

    /// True for failures that a later attempt may not hit
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Storage(_) | Self::Timeout(_)
        )
    }

    /// True for rejected input
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}
