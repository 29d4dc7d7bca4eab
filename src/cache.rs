// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Retention cache
//!
//! [`RetentionCache`] maps each sensor identity to its [`SensorRecord`]. It is
//! not synchronized on its own: the service shares it as a [`SharedCache`] and
//! every read-then-write sequence must hold that single lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, TelemetryError};
use crate::record::{Reading, SensorId, SensorRecord};
use crate::store::SensorStore;

/// The cache as shared between ingestion, aggregation and scheduled jobs
pub type SharedCache = Arc<Mutex<RetentionCache>>;

/// Outcome of loading the cache from storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmUpReport {
    /// Sensors loaded into the cache
    pub loaded: usize,
    /// Sensors skipped because their record could not be read or decoded
    pub skipped: Vec<SensorId>,
}

/// In-memory sensor records, one per sensor
#[derive(Debug, Default, Clone)]
pub struct RetentionCache {
    records: HashMap<SensorId, SensorRecord>,
}

impl RetentionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the cache for sharing
    pub fn into_shared(self) -> SharedCache {
        Arc::new(Mutex::new(self))
    }

    /// Load every sensor the store knows about.
    ///
    /// A sensor whose record cannot be loaded or decoded is logged and
    /// skipped. Failing to enumerate sensors at all is fatal.
    pub fn warm_up(store: &dyn SensorStore) -> Result<(Self, WarmUpReport)> {
        let sensors = store.list().map_err(|e| {
            TelemetryError::Fatal(format!("Could not enumerate stored sensors: {}", e))
        })?;

        let mut cache = Self::new();
        let mut report = WarmUpReport::default();

        for sensor_id in sensors {
            let bytes = match store.load(&sensor_id) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    warn!("Sensor {} listed but has no stored record, skipping", sensor_id);
                    report.skipped.push(sensor_id);
                    continue;
                }
                Err(e) => {
                    warn!("Could not load sensor {}: {}", sensor_id, e);
                    report.skipped.push(sensor_id);
                    continue;
                }
            };

            match SensorRecord::from_json(&bytes) {
                Ok(mut record) => {
                    if record.id != sensor_id {
                        warn!(
                            "Record stored as {} carries id {}, keeping the stored name",
                            sensor_id, record.id
                        );
                        record.id = sensor_id.clone();
                    }
                    debug!("Loaded sensor {} ({} dates)", sensor_id, record.date_count());
                    cache.put(sensor_id, record);
                    report.loaded += 1;
                }
                Err(e) => {
                    warn!("Could not decode sensor {} record: {}", sensor_id, e);
                    report.skipped.push(sensor_id);
                }
            }
        }

        info!(
            "Cache warm-up: {} sensors loaded, {} skipped",
            report.loaded,
            report.skipped.len()
        );
        Ok((cache, report))
    }

    /// Get a sensor's record
    pub fn get(&self, sensor_id: &str) -> Option<&SensorRecord> {
        self.records.get(sensor_id)
    }

    /// Insert or replace a sensor's record
    pub fn put(&mut self, sensor_id: impl Into<SensorId>, record: SensorRecord) {
        self.records.insert(sensor_id.into(), record);
    }

    /// Merge one reading: create the record on a cache miss, otherwise merge
    /// into the existing hour bucket structure.
    pub fn merge(&mut self, reading: &Reading) {
        match self.records.get_mut(&reading.sensor_id) {
            Some(record) => record.merge(&reading.date, reading.hour, reading.temp),
            None => {
                self.records
                    .insert(reading.sensor_id.clone(), SensorRecord::from_reading(reading));
            }
        }
    }

    /// Delete a sensor's dates that start strictly before `cutoff`; returns
    /// the removed keys
    pub fn delete_dates_before(
        &mut self,
        sensor_id: &str,
        cutoff: NaiveDateTime,
    ) -> Result<Vec<String>> {
        self.records
            .get_mut(sensor_id)
            .map(|record| record.prune_before(cutoff))
            .ok_or_else(|| TelemetryError::sensor_not_found(sensor_id))
    }

    /// Check if a sensor is cached
    pub fn contains(&self, sensor_id: &str) -> bool {
        self.records.contains_key(sensor_id)
    }

    /// Stable snapshot of the cached sensor ids
    pub fn sensor_ids(&self) -> Vec<SensorId> {
        self.records.keys().cloned().collect()
    }

    /// Cloned snapshot of every record
    pub fn snapshot(&self) -> Vec<SensorRecord> {
        self.records.values().cloned().collect()
    }

    /// Number of cached sensors
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no sensor is cached
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total values held across all sensors
    pub fn total_values(&self) -> usize {
        self.records.values().map(SensorRecord::value_count).sum()
    }
}
