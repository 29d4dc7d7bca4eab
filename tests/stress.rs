//! Stress tests for SensorCache
//!
//! Run with: cargo test --release stress -- --ignored

use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use sensorcache::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Run manually with --ignored
async fn stress_test_concurrent_direct_ingest() {
    let service = Arc::new(
        TelemetryService::start(ServiceConfig::direct(), Arc::new(MemoryStore::new()), None)
            .await
            .unwrap(),
    );
    let base = NaiveDate::from_ymd_opt(2026, 10, 18)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    let writers = 8;
    let per_writer = 50_000;
    let start = Instant::now();

    let mut handles = Vec::new();
    for w in 0..writers {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..per_writer {
                let when = base + chrono::Duration::minutes((i % 1440) as i64);
                service
                    .submit_at(&format!("sensor-{}", w % 4), when, (i % 40) as i64)
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = writers * per_writer;
    let rate = total as f64 / elapsed.as_secs_f64();
    println!("Ingested {} readings in {:?}", total, elapsed);
    println!("Rate: {:.0} readings/second", rate);

    assert_eq!(service.stats().readings_ingested, total as u64);
    assert_eq!(service.cached_sensor_count().await, 4);
    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn stress_test_queued_ingest() {
    let config = ServiceConfig {
        queue_capacity: 200_000,
        ..Default::default()
    };
    let service = TelemetryService::with_memory_queue(config, Arc::new(MemoryStore::new()))
        .await
        .unwrap();
    let when = NaiveDate::from_ymd_opt(2026, 10, 18)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();

    let iterations = 100_000;
    let start = Instant::now();
    for i in 0..iterations {
        service.submit_at("queued", when, i % 50).await.unwrap();
    }
    service.shutdown().await;
    let elapsed = start.elapsed();

    println!("Published and merged {} readings in {:?}", iterations, elapsed);
    assert_eq!(service.stats().readings_ingested, iterations as u64);
}
