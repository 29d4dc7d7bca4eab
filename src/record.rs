// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sensor record data model
//!
//! A [`SensorRecord`] holds every retained reading of one sensor, grouped by
//! calendar date (`MM-DD-YYYY`) and then by hour of day. A [`Reading`] is one
//! observation on its way in; it doubles as the queue message body.
//!
//! # JSON shape
//!
//! ```text
//! {
//!   "id": "greenhouse-1",
//!   "dates": {
//!     "10-18-2026": [ { "hour": 10, "temp": [21, 25] },
//!                     { "hour": 14, "temp": [19] } ]
//!   }
//! }
//! ```

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::error::{Result, TelemetryError};

/// Date key format used in records, queue messages and query paths
pub const DATE_FORMAT: &str = "%m-%d-%Y";

/// Opaque sensor identity
pub type SensorId = String;

/// Raw temperature value
pub type Temperature = i64;

/// Format a calendar date as a record key
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a record date key
pub fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, DATE_FORMAT)
        .map_err(|e| TelemetryError::Malformed(format!("Invalid date '{}': {}", date, e)))
}

/// Check that a sensor id can name a storage record.
pub fn validate_sensor_id(sensor_id: &str) -> Result<()> {
    if sensor_id.trim().is_empty() {
        return Err(TelemetryError::Malformed("Empty sensor id".to_string()));
    }
    if sensor_id.contains(['/', '\\']) || sensor_id.contains("..") {
        return Err(TelemetryError::Malformed(format!(
            "Sensor id '{}' contains path characters",
            sensor_id
        )));
    }
    Ok(())
}

/// Readings of one sensor within one hour of one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourBucket {
    /// Hour of day (0-23)
    pub hour: u8,
    /// Raw values in arrival order
    #[serde(rename = "temp", default)]
    pub values: Vec<Temperature>,
}

impl HourBucket {
    /// Create a bucket holding a single value
    pub fn new(hour: u8, value: Temperature) -> Self {
        Self {
            hour,
            values: vec![value],
        }
    }

    /// Append a value
    pub fn push(&mut self, value: Temperature) {
        self.values.push(value);
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the bucket holds no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// All retained readings of one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Sensor identity
    pub id: SensorId,
    /// Date key -> hour buckets
    #[serde(default, deserialize_with = "null_as_empty")]
    pub dates: HashMap<String, Vec<HourBucket>>,
}

fn null_as_empty<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<String, Vec<HourBucket>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

impl SensorRecord {
    /// Create an empty record
    pub fn new(id: impl Into<SensorId>) -> Self {
        Self {
            id: id.into(),
            dates: HashMap::new(),
        }
    }

    /// Create a record holding one reading
    pub fn from_reading(reading: &Reading) -> Self {
        let mut record = Self::new(reading.sensor_id.clone());
        record.merge(&reading.date, reading.hour, reading.temp);
        record
    }

    /// Merge a value into the bucket for `(date, hour)`.
    ///
    /// A missing date gets a fresh bucket list; an existing bucket for the
    /// hour is appended to; otherwise a new bucket is appended. There is never
    /// more than one bucket per `(date, hour)`.
    pub fn merge(&mut self, date: &str, hour: u8, value: Temperature) {
        let buckets = self.dates.entry(date.to_string()).or_default();
        match buckets.iter_mut().find(|bucket| bucket.hour == hour) {
            Some(bucket) => bucket.push(value),
            None => buckets.push(HourBucket::new(hour, value)),
        }
    }

    /// Hour buckets of a date
    pub fn buckets(&self, date: &str) -> Option<&[HourBucket]> {
        self.dates.get(date).map(Vec::as_slice)
    }

    /// Check if a date is retained
    pub fn has_date(&self, date: &str) -> bool {
        self.dates.contains_key(date)
    }

    /// Number of retained dates
    pub fn date_count(&self) -> usize {
        self.dates.len()
    }

    /// Total number of values across all dates
    pub fn value_count(&self) -> usize {
        self.dates
            .values()
            .flat_map(|buckets| buckets.iter())
            .map(HourBucket::len)
            .sum()
    }

    /// Sum of all values across all dates
    pub fn value_sum(&self) -> i128 {
        self.dates
            .values()
            .flat_map(|buckets| buckets.iter())
            .flat_map(|b| b.values.iter())
            .map(|&v| v as i128)
            .sum()
    }

    /// Remove every date whose midnight falls strictly before `cutoff`;
    /// returns the removed keys.
    ///
    /// Keys that do not parse are logged and kept.
    pub fn prune_before(&mut self, cutoff: NaiveDateTime) -> Vec<String> {
        let keys: Vec<String> = self.dates.keys().cloned().collect();
        let mut removed = Vec::new();

        for key in keys {
            match parse_date(&key) {
                Ok(date) if date.and_time(NaiveTime::MIN) < cutoff => {
                    self.dates.remove(&key);
                    removed.push(key);
                }
                Ok(_) => {}
                Err(e) => warn!("Sensor {}: keeping unparseable date key: {}", self.id, e),
            }
        }

        removed
    }

    /// Serialize to the stored JSON form
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from the stored JSON form
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| TelemetryError::Malformed(format!("Invalid sensor record: {}", e)))
    }
}

/// One observation of one sensor, already bucketed by date and hour.
///
/// This is also the body of queue messages: `{sensorId, date, hour, temp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub sensor_id: SensorId,
    pub date: String,
    pub hour: u8,
    pub temp: Temperature,
}

impl Reading {
    /// Create a reading from already-derived date and hour
    pub fn new(sensor_id: impl Into<SensorId>, date: impl Into<String>, hour: u8, temp: Temperature) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            date: date.into(),
            hour,
            temp,
        }
    }

    /// Create a reading stamped with a wall-clock timestamp
    pub fn at(sensor_id: impl Into<SensorId>, timestamp: NaiveDateTime, temp: Temperature) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            date: format_date(timestamp.date()),
            hour: timestamp.hour() as u8,
            temp,
        }
    }

    /// Check sensor id, hour range and date format
    pub fn validate(&self) -> Result<()> {
        validate_sensor_id(&self.sensor_id)?;
        if self.hour > 23 {
            return Err(TelemetryError::Malformed(format!(
                "Hour {} out of range",
                self.hour
            )));
        }
        parse_date(&self.date)?;
        Ok(())
    }

    /// Encode as a queue message
    pub fn to_message(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate a queue message
    pub fn from_message(bytes: &[u8]) -> Result<Self> {
        let reading: Reading = serde_json::from_slice(bytes)
            .map_err(|e| TelemetryError::Malformed(format!("Undecodable message: {}", e)))?;
        reading.validate()?;
        Ok(reading)
    }
}
