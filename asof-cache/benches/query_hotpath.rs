use asof_cache::{CacheConfig, HistoricalCache, HistorySource};
use asof_test_utils::sources::{integer_source, Record};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

const HISTORY_LEN: i64 = 10_000;

fn warm_cache() -> HistoricalCache<i64, Record<i64>> {
    let source: Arc<dyn HistorySource<i64, Record<i64>>> =
        Arc::new(integer_source((0..HISTORY_LEN).map(|k| k * 10)).with_max_results(500));
    let cache = HistoricalCache::new(source, CacheConfig::default()).expect("valid config");
    cache
        .query()
        .get_keys(0, HISTORY_LEN * 10)
        .expect("warm up")
        .into_iter()
        .count();
    cache
}

fn bench_point_lookup(c: &mut Criterion) {
    let cache = warm_cache();
    let query = cache.query();
    c.bench_function("query/point_lookup_warm", |b| {
        b.iter(|| {
            let value = query.get_value(black_box(54_321)).expect("lookup");
            black_box(value);
        });
    });
}

fn bench_previous_batch(c: &mut Criterion) {
    let cache = warm_cache();
    let query = cache.query();
    c.bench_function("query/previous_values_64", |b| {
        b.iter(|| {
            let values = query
                .get_previous_values(black_box(80_000), 64)
                .expect("previous values");
            black_box(values.into_iter().count());
        });
    });
}

fn bench_range(c: &mut Criterion) {
    let cache = warm_cache();
    let query = cache.query();
    c.bench_function("query/range_1000", |b| {
        b.iter(|| {
            let keys = query.get_keys(black_box(20_000), 30_000).expect("range");
            black_box(keys.into_iter().count());
        });
    });
}

fn bench_cold_point_lookup(c: &mut Criterion) {
    c.bench_function("query/point_lookup_cold", |b| {
        b.iter(|| {
            let source: Arc<dyn HistorySource<i64, Record<i64>>> =
                Arc::new(integer_source((0..100).map(|k| k * 10)));
            let cache = HistoricalCache::with_defaults(source);
            black_box(cache.query().get_value(black_box(555)).expect("lookup"));
        });
    });
}

criterion_group!(
    benches,
    bench_point_lookup,
    bench_previous_batch,
    bench_range,
    bench_cold_point_lookup
);
criterion_main!(benches);
