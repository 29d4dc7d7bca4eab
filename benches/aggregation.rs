//! Benchmarks for SensorCache ingestion and aggregation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensorcache::{aggregate, Reading, RetentionCache};

const DATES: [&str; 7] = [
    "10-12-2026",
    "10-13-2026",
    "10-14-2026",
    "10-15-2026",
    "10-16-2026",
    "10-17-2026",
    "10-18-2026",
];

fn generate_readings(sensor: &str, count: usize) -> Vec<Reading> {
    (0..count)
        .map(|i| {
            let date = DATES[i % DATES.len()];
            let hour = ((i / DATES.len()) % 24) as u8;
            Reading::new(sensor, date, hour, 15 + (i % 20) as i64)
        })
        .collect()
}

fn filled_cache(readings_per_sensor: usize) -> RetentionCache {
    let mut cache = RetentionCache::new();
    for sensor in ["s0", "s1", "s2", "s3"] {
        for reading in generate_readings(sensor, readings_per_sensor) {
            cache.merge(&reading);
        }
    }
    cache
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let readings = generate_readings("s0", 10_000);

    group.throughput(Throughput::Elements(readings.len() as u64));
    group.bench_function("merge_10000_readings", |b| {
        b.iter(|| {
            let mut cache = RetentionCache::new();
            for reading in &readings {
                cache.merge(reading);
            }
            black_box(cache.total_values())
        })
    });

    group.finish();
}

fn bench_daily(c: &mut Criterion) {
    let mut group = c.benchmark_group("daily");

    for size in [1_000, 10_000, 100_000] {
        let cache = filled_cache(size);
        group.bench_with_input(BenchmarkId::new("daily_avg", size), &cache, |b, cache| {
            b.iter(|| aggregate::daily_avg(black_box(cache), "s1", "10-18-2026"))
        });
        group.bench_with_input(BenchmarkId::new("daily_summary", size), &cache, |b, cache| {
            b.iter(|| aggregate::daily_summary(black_box(cache), "s1", "10-18-2026"))
        });
    }

    group.finish();
}

fn bench_weekly(c: &mut Criterion) {
    let mut group = c.benchmark_group("weekly");
    let cache = filled_cache(100_000);

    group.bench_function("weekly_max", |b| {
        b.iter(|| aggregate::weekly_max(black_box(&cache), "s2"))
    });
    group.bench_function("weekly_avg", |b| {
        b.iter(|| aggregate::weekly_avg(black_box(&cache), "s2"))
    });

    group.finish();
}

criterion_group!(benches, bench_merge, bench_daily, bench_weekly);
criterion_main!(benches);
