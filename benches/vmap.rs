//! Versioned map benchmarks: write throughput, snapshot cost, and scan
//! overhead with live readers pinning history.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snapdb::VersionedMap;

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("vmap_insert");
    for count in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter(|| {
                let mut map: VersionedMap<u64, u64> = VersionedMap::new();
                for k in 0..count {
                    map.insert(k, k);
                }
                black_box(map.version())
            });
        });
    }
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut map: VersionedMap<u64, u64> = VersionedMap::new();
    for k in 0..10_000u64 {
        map.insert(k, k);
    }
    c.bench_function("vmap_snapshot", |b| {
        b.iter(|| black_box(map.snapshot().version()));
    });
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("vmap_scan");
    let mut map: VersionedMap<u64, u64> = VersionedMap::new();
    for k in 0..10_000u64 {
        map.insert(k, k);
    }
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("clean", |b| {
        b.iter(|| black_box(map.all().count()));
    });

    // Half the keys carry tombstones pinned by a reader.
    let pin = map.snapshot();
    for k in (0..10_000u64).step_by(2) {
        map.erase(&k);
    }
    group.bench_function("tombstoned", |b| {
        b.iter(|| black_box(map.all().count()));
    });
    drop(pin);
    group.finish();
}

criterion_group!(benches, bench_insert, bench_snapshot, bench_scan);
criterion_main!(benches);
