//! Recording and snapshot benchmarks
//!
//! Run with: `cargo bench --bench registry_bench -p metricflow-core`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use metricflow_core::{tags, MetricRegistry, TagSet};

// ============================================================================
// Recording Benchmarks
// ============================================================================

fn bench_counter_increment(c: &mut Criterion) {
    let registry = MetricRegistry::new();
    let counter = registry.get_or_create_counter("requests_total", "");
    let tags = tags! { "env" => "prod", "route" => "/api" };

    let mut group = c.benchmark_group("counter_increment");
    group.throughput(Throughput::Elements(1));
    group.bench_function("existing_series", |b| {
        b.iter(|| counter.inc(black_box(&tags), 1.0));
    });
    group.finish();
}

fn bench_histogram_observe(c: &mut Criterion) {
    let registry = MetricRegistry::new();
    let histogram = registry.get_or_create_histogram("latency_seconds", "", None);
    let tags = TagSet::new();

    let mut group = c.benchmark_group("histogram_observe");
    group.throughput(Throughput::Elements(1));
    let mut value = 0.0_f64;
    group.bench_function("default_buckets", |b| {
        b.iter(|| {
            value = (value + 0.013) % 12.0;
            histogram.observe(&tags, black_box(value));
        });
    });
    group.finish();
}

// ============================================================================
// Snapshot Benchmarks
// ============================================================================

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_snapshot");

    for series in [10, 100, 1000] {
        let registry = MetricRegistry::new();
        let counter = registry.get_or_create_counter("requests_total", "");
        let histogram = registry.get_or_create_histogram("latency_seconds", "", None);
        for i in 0..series {
            let tags = tags! { "instance" => i.to_string() };
            counter.inc(&tags, 1.0);
            histogram.observe(&tags, 0.2);
        }

        group.throughput(Throughput::Elements(series as u64 * 2));
        group.bench_with_input(BenchmarkId::from_parameter(series), &registry, |b, registry| {
            b.iter(|| black_box(registry.snapshot()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_counter_increment, bench_histogram_observe, bench_snapshot);
criterion_main!(benches);
