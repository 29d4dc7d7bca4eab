// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Aggregation engine
//!
//! Read-only daily and weekly min/max/average over the retention cache.
//! These functions never mutate the cache; callers hold the cache lock for
//! the duration of a call so they never see a half-merged record.
//!
//! "Weekly" means every date currently retained for the sensor.

use serde::Serialize;

use crate::cache::RetentionCache;
use crate::error::{Result, TelemetryError};
use crate::record::{HourBucket, SensorRecord, Temperature};

/// Min, max and mean of one sensor-day, computed in one pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailySummary {
    pub min: Temperature,
    pub max: Temperature,
    pub avg: f64,
    pub count: usize,
}

fn record<'a>(cache: &'a RetentionCache, sensor_id: &str) -> Result<&'a SensorRecord> {
    cache
        .get(sensor_id)
        .ok_or_else(|| TelemetryError::sensor_not_found(sensor_id))
}

fn date_buckets<'a>(
    cache: &'a RetentionCache,
    sensor_id: &str,
    date: &str,
) -> Result<&'a [HourBucket]> {
    record(cache, sensor_id)?
        .buckets(date)
        .ok_or_else(|| TelemetryError::date_not_found(sensor_id, date))
}

fn empty_date(sensor_id: &str, date: &str) -> TelemetryError {
    TelemetryError::EmptyDate {
        sensor_id: sensor_id.to_string(),
        date: date.to_string(),
    }
}

fn values(buckets: &[HourBucket]) -> impl Iterator<Item = Temperature> + '_ {
    buckets.iter().flat_map(|b| b.values.iter().copied())
}

fn bucket_max(buckets: &[HourBucket]) -> Option<Temperature> {
    values(buckets).max()
}

fn bucket_min(buckets: &[HourBucket]) -> Option<Temperature> {
    values(buckets).min()
}

/// Sum of values over count of values (not count of hours)
fn bucket_avg(buckets: &[HourBucket]) -> Option<f64> {
    let (sum, count) = values(buckets).fold((0.0f64, 0usize), |(sum, count), v| {
        (sum + v as f64, count + 1)
    });
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Highest value recorded on `date`
pub fn daily_max(cache: &RetentionCache, sensor_id: &str, date: &str) -> Result<Temperature> {
    let buckets = date_buckets(cache, sensor_id, date)?;
    bucket_max(buckets).ok_or_else(|| empty_date(sensor_id, date))
}

/// Lowest value recorded on `date`
pub fn daily_min(cache: &RetentionCache, sensor_id: &str, date: &str) -> Result<Temperature> {
    let buckets = date_buckets(cache, sensor_id, date)?;
    bucket_min(buckets).ok_or_else(|| empty_date(sensor_id, date))
}

/// Mean of every value recorded on `date`
pub fn daily_avg(cache: &RetentionCache, sensor_id: &str, date: &str) -> Result<f64> {
    let buckets = date_buckets(cache, sensor_id, date)?;
    bucket_avg(buckets).ok_or_else(|| empty_date(sensor_id, date))
}

/// Min, max and mean of `date` in one pass
pub fn daily_summary(cache: &RetentionCache, sensor_id: &str, date: &str) -> Result<DailySummary> {
    let buckets = date_buckets(cache, sensor_id, date)?;
    let mut iter = values(buckets);
    let first = iter.next().ok_or_else(|| empty_date(sensor_id, date))?;

    let mut summary = DailySummary {
        min: first,
        max: first,
        avg: 0.0,
        count: 1,
    };
    let mut sum = first as f64;
    for v in iter {
        summary.min = summary.min.min(v);
        summary.max = summary.max.max(v);
        summary.count += 1;
        sum += v as f64;
    }
    summary.avg = sum / summary.count as f64;
    Ok(summary)
}

/// Fold per-date extrema into one; dates that do not improve on the running
/// extremum are skipped, dates without values are ignored.
fn weekly_extremum(
    record: &SensorRecord,
    daily: fn(&[HourBucket]) -> Option<Temperature>,
    improves: fn(Temperature, Temperature) -> bool,
) -> Result<Temperature> {
    let mut best: Option<Temperature> = None;

    for buckets in record.dates.values() {
        let Some(day) = daily(buckets) else {
            continue;
        };
        match best {
            Some(current) if !improves(day, current) => continue,
            _ => best = Some(day),
        }
    }

    best.ok_or_else(|| TelemetryError::sensor_not_found(record.id.as_str()))
}

/// Highest daily maximum across every retained date
pub fn weekly_max(cache: &RetentionCache, sensor_id: &str) -> Result<Temperature> {
    weekly_extremum(record(cache, sensor_id)?, bucket_max, |day, best| day > best)
}

/// Lowest daily minimum across every retained date
pub fn weekly_min(cache: &RetentionCache, sensor_id: &str) -> Result<Temperature> {
    weekly_extremum(record(cache, sensor_id)?, bucket_min, |day, best| day < best)
}

/// Mean of the daily means across every retained date.
///
/// Every day weighs the same regardless of how many readings it holds.
pub fn weekly_avg(cache: &RetentionCache, sensor_id: &str) -> Result<f64> {
    let record = record(cache, sensor_id)?;
    let daily: Vec<f64> = record
        .dates
        .values()
        .filter_map(|buckets| bucket_avg(buckets))
        .collect();

    if daily.is_empty() {
        return Err(TelemetryError::sensor_not_found(sensor_id));
    }
    Ok(daily.iter().sum::<f64>() / daily.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Reading;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    const DAY: &str = "10-18-2026";

    fn scenario_cache() -> RetentionCache {
        let mut cache = RetentionCache::new();
        cache.merge(&Reading::new("s1", DAY, 10, 21));
        cache.merge(&Reading::new("s1", DAY, 10, 25));
        cache.merge(&Reading::new("s1", DAY, 14, 19));
        cache
    }

    #[test]
    fn test_daily_scenario() {
        let cache = scenario_cache();
        assert_eq!(daily_max(&cache, "s1", DAY).unwrap(), 25);
        assert_eq!(daily_min(&cache, "s1", DAY).unwrap(), 19);
        assert_relative_eq!(daily_avg(&cache, "s1", DAY).unwrap(), 65.0 / 3.0);
    }

    #[test]
    fn test_daily_summary_matches() {
        let cache = scenario_cache();
        let summary = daily_summary(&cache, "s1", DAY).unwrap();
        assert_eq!(summary.min, 19);
        assert_eq!(summary.max, 25);
        assert_eq!(summary.count, 3);
        assert_relative_eq!(summary.avg, daily_avg(&cache, "s1", DAY).unwrap());
    }

    #[test]
    fn test_unknown_sensor_not_found() {
        let cache = RetentionCache::new();
        let err = daily_max(&cache, "ghost", DAY).unwrap_err();
        assert!(matches!(err, TelemetryError::NotFound { date: None, .. }));
        assert!(weekly_max(&cache, "ghost").unwrap_err().is_not_found());
        assert!(weekly_avg(&cache, "ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn test_unknown_date_not_found() {
        let cache = scenario_cache();
        let err = daily_min(&cache, "s1", "01-01-2020").unwrap_err();
        assert!(matches!(err, TelemetryError::NotFound { date: Some(_), .. }));
    }

    #[test]
    fn test_empty_date_guard() {
        let mut cache = RetentionCache::new();
        let mut record = SensorRecord::new("s1");
        record.dates.insert(DAY.to_string(), vec![HourBucket { hour: 3, values: vec![] }]);
        cache.put("s1", record);

        assert!(matches!(
            daily_avg(&cache, "s1", DAY),
            Err(TelemetryError::EmptyDate { .. })
        ));
        assert!(matches!(
            daily_max(&cache, "s1", DAY),
            Err(TelemetryError::EmptyDate { .. })
        ));
        assert!(weekly_avg(&cache, "s1").is_err());
    }

    #[test]
    fn test_weekly_extrema_across_dates() {
        let mut cache = RetentionCache::new();
        cache.merge(&Reading::new("s1", "10-12-2026", 1, 18));
        cache.merge(&Reading::new("s1", "10-13-2026", 1, 31));
        cache.merge(&Reading::new("s1", "10-14-2026", 1, 22));
        cache.merge(&Reading::new("s1", "10-15-2026", 1, -4));
        cache.merge(&Reading::new("s1", "10-15-2026", 2, 12));

        assert_eq!(weekly_max(&cache, "s1").unwrap(), 31);
        assert_eq!(weekly_min(&cache, "s1").unwrap(), -4);
    }

    #[test]
    fn test_weekly_avg_is_mean_of_daily_means() {
        let mut cache = RetentionCache::new();
        cache.merge(&Reading::new("s1", "10-17-2026", 1, 10));
        for v in [20, 20, 20, 50] {
            cache.merge(&Reading::new("s1", "10-18-2026", 2, v));
        }

        // (10 + 27.5) / 2, not 110 / 5
        assert_relative_eq!(weekly_avg(&cache, "s1").unwrap(), 18.75);
    }

    #[test]
    fn test_weekly_bounds_daily_randomized() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut cache = RetentionCache::new();
        let dates: Vec<String> = (10..17).map(|d| format!("10-{:02}-2026", d)).collect();

        for _ in 0..500 {
            let date = &dates[rng.gen_range(0..dates.len())];
            let hour = rng.gen_range(0..24u8);
            let temp = rng.gen_range(-40..60i64);
            cache.merge(&Reading::new("s1", date.as_str(), hour, temp));
        }

        let weekly_hi = weekly_max(&cache, "s1").unwrap();
        let weekly_lo = weekly_min(&cache, "s1").unwrap();
        let record = cache.get("s1").unwrap();
        let daily_his: Vec<i64> = record
            .dates
            .keys()
            .map(|d| daily_max(&cache, "s1", d).unwrap())
            .collect();
        let daily_los: Vec<i64> = record
            .dates
            .keys()
            .map(|d| daily_min(&cache, "s1", d).unwrap())
            .collect();

        assert!(daily_his.iter().all(|&d| weekly_hi >= d));
        assert!(daily_his.contains(&weekly_hi));
        assert!(daily_los.iter().all(|&d| weekly_lo <= d));
        assert!(daily_los.contains(&weekly_lo));
    }

    #[test]
    fn test_daily_avg_randomized() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut cache = RetentionCache::new();
        let mut all = Vec::new();

        for _ in 0..300 {
            let temp = rng.gen_range(-20..45i64);
            all.push(temp);
            cache.merge(&Reading::new("s1", DAY, rng.gen_range(0..24u8), temp));
        }

        let expected = all.iter().sum::<i64>() as f64 / all.len() as f64;
        assert_relative_eq!(daily_avg(&cache, "s1", DAY).unwrap(), expected, epsilon = 1e-9);
    }
}
