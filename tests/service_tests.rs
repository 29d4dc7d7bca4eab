//! End-to-end tests of the telemetry service

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use chrono::{NaiveDate, NaiveDateTime};
use rand::{Rng, SeedableRng};
use sensorcache::*;

fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

async fn direct_service(store: Arc<MemoryStore>) -> TelemetryService {
    TelemetryService::start(ServiceConfig::direct(), store, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_three_readings_scenario() {
    let service = direct_service(Arc::new(MemoryStore::new())).await;

    service.submit_at("s1", ts(18, 10, 15), 21).await.unwrap();
    service.submit_at("s1", ts(18, 10, 45), 25).await.unwrap();
    service.submit_at("s1", ts(18, 14, 0), 19).await.unwrap();

    assert_eq!(service.daily_max("s1", "10-18-2026").await.unwrap(), 25);
    assert_eq!(service.daily_min("s1", "10-18-2026").await.unwrap(), 19);
    assert_relative_eq!(
        service.daily_avg("s1", "10-18-2026").await.unwrap(),
        65.0 / 3.0,
        epsilon = 1e-9
    );

    let summary = service.daily_summary("s1", "10-18-2026").await.unwrap();
    assert_eq!(summary.count, 3);

    service.shutdown().await;
}

#[tokio::test]
async fn test_unknown_sensor_is_not_found() {
    let service = direct_service(Arc::new(MemoryStore::new())).await;

    let err = service.daily_max("nobody", "10-18-2026").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(service.weekly_min("nobody").await.unwrap_err().is_not_found());

    service.shutdown().await;
}

#[tokio::test]
async fn test_stored_sum_matches_ingested_sum() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(2026);
    let store = Arc::new(MemoryStore::new());
    let service = direct_service(store.clone()).await;
    let mut expected: i128 = 0;

    for _ in 0..1_000 {
        let sensor = format!("s{}", rng.gen_range(0..5));
        let when = ts(rng.gen_range(12..19), rng.gen_range(0..24), rng.gen_range(0..60));
        let temp = rng.gen_range(-30..50i64);
        service.submit_at(&sensor, when, temp).await.unwrap();
        expected += temp as i128;
    }

    let report = service.shutdown().await.unwrap();
    assert!(report.failed.is_empty());
    assert_eq!(service.stats().readings_ingested, 1_000);

    let stored: i128 = store
        .list()
        .unwrap()
        .iter()
        .map(|id| SensorRecord::from_json(&store.get(id).unwrap()).unwrap())
        .map(|record| record.value_sum())
        .sum();
    assert_eq!(stored, expected);
}

#[tokio::test]
async fn test_queued_path_reaches_cache() {
    let store = Arc::new(MemoryStore::new());
    let service = TelemetryService::with_memory_queue(ServiceConfig::default(), store)
        .await
        .unwrap();

    service.submit_at("q", ts(18, 8, 0), 11).await.unwrap();
    service.submit_at("q", ts(18, 9, 0), 13).await.unwrap();

    let mut visible = false;
    for _ in 0..100 {
        if let Ok(13) = service.daily_max("q", "10-18-2026").await {
            visible = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(visible, "queued readings never reached the cache");

    service.shutdown().await;
    assert_eq!(service.stats().readings_published, 2);
}

#[tokio::test]
async fn test_queued_rejects_malformed_submission() {
    let service = TelemetryService::with_memory_queue(
        ServiceConfig::default(),
        Arc::new(MemoryStore::new()),
    )
    .await
    .unwrap();

    let err = service.submit_at("bad/id", ts(18, 1, 0), 1).await.unwrap_err();
    assert!(err.is_malformed());
    assert_eq!(service.transport_metrics().unwrap().messages_published, 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_weekly_spans_retained_dates() {
    let service = direct_service(Arc::new(MemoryStore::new())).await;

    service.submit_at("w", ts(12, 6, 0), 14).await.unwrap();
    service.submit_at("w", ts(14, 6, 0), 30).await.unwrap();
    service.submit_at("w", ts(16, 6, 0), 8).await.unwrap();
    service.submit_at("w", ts(16, 7, 0), 12).await.unwrap();

    assert_eq!(service.weekly_max("w").await.unwrap(), 30);
    assert_eq!(service.weekly_min("w").await.unwrap(), 8);
    // (14 + 30 + 10) / 3
    assert_relative_eq!(service.weekly_avg("w").await.unwrap(), 18.0);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_admission_saturation_times_out() {
    let config = ServiceConfig {
        max_in_flight: 1,
        request_timeout: Some(Duration::from_millis(250)),
        ..ServiceConfig::direct()
    };
    let service = Arc::new(
        TelemetryService::start(config, Arc::new(MemoryStore::new()), None)
            .await
            .unwrap(),
    );

    let (release, hold) = tokio::sync::oneshot::channel::<()>();
    let holder = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .admission()
                .run(async move {
                    let _ = hold.await;
                })
                .await
        })
    };
    tokio::task::yield_now().await;

    let result = service
        .admission()
        .run(service.submit_at("s1", ts(18, 1, 0), 1))
        .await;
    assert!(matches!(result, Err(TelemetryError::Timeout(_))));
    assert!(service.stats().admission_rejected >= 1);

    let _ = release.send(());
    let _ = holder.await;
    service.shutdown().await;
}
