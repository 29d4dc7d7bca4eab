// SensorCache Server - Dataset replay engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Backfill the cache from a recorded CSV dataset.
//!
//! The dataset has a `timestamp_ms` column followed by one column per sensor.
//! Every non-empty cell becomes a reading for that sensor at that instant
//! (converted to local wall time) and goes through the direct ingestion path.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use sensorcache::{Reading, TelemetryService, Temperature};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::metrics::update_replay_metrics;

/// Configuration for dataset replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Path to CSV dataset file.
    pub csv_path: String,
    /// Replay speed multiplier (1.0 = recorded pace, 0 = as fast as possible).
    pub speed: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            csv_path: String::new(),
            speed: 0.0,
        }
    }
}

/// Progress of a running replay.
#[derive(Debug, Default)]
pub struct ReplayState {
    /// Rows replayed so far.
    pub position: AtomicUsize,
    /// Rows in the dataset.
    pub total_rows: AtomicUsize,
    /// Readings the engine accepted.
    pub readings_ingested: AtomicUsize,
    /// Readings the engine refused.
    pub readings_rejected: AtomicUsize,
    /// Whether replay is running.
    pub running: AtomicBool,
}

#[derive(Debug, Clone)]
struct DataRow {
    timestamp: NaiveDateTime,
    timestamp_ms: u64,
    values: Vec<(String, Temperature)>,
}

/// Dataset information.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub sensor_count: usize,
    pub row_count: usize,
    pub duration_ms: u64,
    pub sensor_ids: Vec<String>,
}

/// Feeds a CSV dataset into the telemetry service.
pub struct ReplayEngine {
    config: ReplayConfig,
    state: Arc<ReplayState>,
    sensor_ids: Vec<String>,
    rows: Vec<DataRow>,
    stopped: AtomicBool,
}

impl ReplayEngine {
    /// Load and validate a dataset.
    pub fn from_csv(config: ReplayConfig) -> Result<Self, ReplayError> {
        let path = Path::new(&config.csv_path);
        if !path.exists() {
            return Err(ReplayError::FileNotFound(config.csv_path.clone()));
        }

        let (sensor_ids, rows) = Self::parse_csv(path)?;
        if rows.is_empty() {
            return Err(ReplayError::EmptyDataset);
        }

        let state = Arc::new(ReplayState::default());
        state.total_rows.store(rows.len(), Ordering::SeqCst);

        info!(
            "Loaded dataset: {} sensors, {} rows",
            sensor_ids.len(),
            rows.len()
        );

        Ok(Self {
            config,
            state,
            sensor_ids,
            rows,
            stopped: AtomicBool::new(false),
        })
    }

    fn parse_csv(path: &Path) -> Result<(Vec<String>, Vec<DataRow>), ReplayError> {
        let mut reader = csv::Reader::from_path(path)?;

        let headers = reader.headers()?.clone();
        let mut columns = headers.iter();
        if columns.next() != Some("timestamp_ms") {
            return Err(ReplayError::InvalidFormat(
                "First column must be 'timestamp_ms'".to_string(),
            ));
        }
        let sensor_ids: Vec<String> = columns.map(|s| s.trim().to_string()).collect();
        if let Some(bad) = sensor_ids
            .iter()
            .find(|id| sensorcache::record::validate_sensor_id(id).is_err())
        {
            return Err(ReplayError::InvalidFormat(format!(
                "Column '{}' is not a valid sensor id",
                bad
            )));
        }

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let mut cells = record.iter();
            let Some(first) = cells.next() else {
                continue;
            };

            let timestamp_ms: u64 = first
                .trim()
                .parse()
                .map_err(|_| ReplayError::InvalidFormat(format!("Invalid timestamp '{}'", first)))?;
            let timestamp = local_time(timestamp_ms)?;

            let values = sensor_ids
                .iter()
                .zip(cells)
                .filter_map(|(sensor_id, cell)| {
                    parse_temperature(cell.trim()).map(|temp| (sensor_id.clone(), temp))
                })
                .collect();

            rows.push(DataRow {
                timestamp,
                timestamp_ms,
                values,
            });
        }

        Ok((sensor_ids, rows))
    }

    /// Get the replay state.
    pub fn state(&self) -> Arc<ReplayState> {
        Arc::clone(&self.state)
    }

    /// Replay every row once, then stop.
    pub async fn run(&self, service: Arc<TelemetryService>) {
        self.state.running.store(true, Ordering::SeqCst);
        info!("Starting replay: speed={}", self.config.speed);

        for (position, row) in self.rows.iter().enumerate() {
            if self.stopped.load(Ordering::SeqCst) || service.is_shutting_down() {
                info!("Replay stopped at row {}", position);
                break;
            }

            self.process_row(&service, row, position).await;
            self.state.position.store(position + 1, Ordering::SeqCst);
            update_replay_metrics(position + 1, self.rows.len(), self.config.speed);

            if self.config.speed > 0.0 {
                if let Some(next) = self.rows.get(position + 1) {
                    let gap_ms = next.timestamp_ms.saturating_sub(row.timestamp_ms);
                    let sleep_ms = (gap_ms as f64 / self.config.speed) as u64;
                    if sleep_ms > 0 {
                        sleep(Duration::from_millis(sleep_ms)).await;
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::SeqCst);
        info!(
            "Replay complete: {} readings ingested, {} rejected",
            self.state.readings_ingested.load(Ordering::SeqCst),
            self.state.readings_rejected.load(Ordering::SeqCst)
        );
    }

    async fn process_row(&self, service: &TelemetryService, row: &DataRow, position: usize) {
        debug!("Replaying row {} at timestamp {}", position, row.timestamp_ms);

        for (sensor_id, temp) in &row.values {
            let reading = Reading::at(sensor_id.as_str(), row.timestamp, *temp);
            match service.ingest_direct(&reading).await {
                Ok(()) => {
                    self.state.readings_ingested.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    warn!("Replay could not ingest {} for {}: {}", temp, sensor_id, e);
                    self.state.readings_rejected.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    /// Stop the replay after the current row. A replay not yet started
    /// will not run.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Get dataset info.
    pub fn dataset_info(&self) -> DatasetInfo {
        let duration_ms = match (self.rows.first(), self.rows.last()) {
            (Some(first), Some(last)) => last.timestamp_ms.saturating_sub(first.timestamp_ms),
            _ => 0,
        };

        DatasetInfo {
            sensor_count: self.sensor_ids.len(),
            row_count: self.rows.len(),
            duration_ms,
            sensor_ids: self.sensor_ids.clone(),
        }
    }
}

fn local_time(timestamp_ms: u64) -> Result<NaiveDateTime, ReplayError> {
    let millis = i64::try_from(timestamp_ms)
        .map_err(|_| ReplayError::InvalidFormat(format!("Timestamp {} out of range", timestamp_ms)))?;
    Local
        .timestamp_millis_opt(millis)
        .earliest()
        .map(|t| t.naive_local())
        .ok_or_else(|| ReplayError::InvalidFormat(format!("Timestamp {} out of range", timestamp_ms)))
}

/// Integers are taken as-is, decimals are rounded, anything else is skipped.
fn parse_temperature(cell: &str) -> Option<Temperature> {
    if cell.is_empty() {
        return None;
    }
    cell.parse::<Temperature>().ok().or_else(|| {
        cell.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v.round() as Temperature)
    })
}

/// Replay errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Empty dataset")]
    EmptyDataset,
}
