//! Criterion benchmarks for ring log hot paths.
//!
//! Key metrics:
//! - Append throughput for various record sizes, in memory and on disk
//! - Snapshot latency at different fill levels
//! - Sample appends from several threads through the shared log
//!
//! Run with: cargo bench --bench ring_log

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fishfinder::storage::{CircularSampleLog, MemoryStore, RingLog};
use fishfinder::{Sample, SAMPLE_BYTES};
use std::sync::Arc;
use std::thread;

fn sample(i: i64) -> Sample {
    Sample {
        timestamp_ms: i,
        latitude: 47.6 + i as f64 * 1e-6,
        longitude: -122.3,
        depth_m: 4.0,
        bottom_strength_pct: 50,
        ..Sample::default()
    }
}

/// Write throughput for record-sized and larger writes.
fn ring_log_write_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_log_write");

    let sizes = vec![
        ("sample", SAMPLE_BYTES),
        ("1KB", 1024),
        ("16KB", 16 * 1024),
    ];

    for (name, size) in sizes {
        let data = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        let mut memory = RingLog::create_in(MemoryStore::new(), 1 << 20).unwrap();
        group.bench_with_input(BenchmarkId::new("memory", name), &size, |b, _| {
            b.iter(|| memory.write(black_box(&data)).unwrap());
        });

        let temp_dir = tempfile::tempdir().unwrap();
        let mut file = RingLog::create(&temp_dir.path().join("bench.ring"), 1 << 20).unwrap();
        group.bench_with_input(BenchmarkId::new("file", name), &size, |b, _| {
            b.iter(|| file.write(black_box(&data)).unwrap());
        });
    }

    group.finish();
}

/// Snapshot latency at different fill levels on a file-backed log.
fn ring_log_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_log_snapshot");

    for samples in [0u32, 100, 1_000, 10_000] {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = CircularSampleLog::create(&temp_dir.path().join("bench.ring"), 10_000).unwrap();
        for i in 0..samples {
            log.append(&sample(i64::from(i))).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("snapshot_all", samples), &samples, |b, _| {
            b.iter(|| black_box(log.snapshot_all().unwrap()));
        });
    }

    group.finish();
}

/// Appends from several threads at once, serialized by the log's lock.
fn sample_log_concurrent_appends(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_log_concurrent");

    for thread_count in [1, 2, 4] {
        let log = Arc::new(CircularSampleLog::create_in(MemoryStore::new(), 10_000).unwrap());

        group.bench_with_input(
            BenchmarkId::new("appends", thread_count),
            &thread_count,
            |b, &thread_count| {
                b.iter(|| {
                    let handles: Vec<_> = (0..thread_count)
                        .map(|t| {
                            let log = Arc::clone(&log);
                            thread::spawn(move || {
                                for i in 0..100 {
                                    log.append(&sample(t * 1000 + i)).unwrap();
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

/// Wrap-around writes on a buffer far smaller than the write volume.
fn ring_log_wrap_around(c: &mut Criterion) {
    let mut log = RingLog::create_in(MemoryStore::new(), 1000 * SAMPLE_BYTES as u32).unwrap();
    let data = vec![0xCC; 700 * SAMPLE_BYTES];

    c.bench_function("ring_log_wrap_write", |b| {
        b.iter(|| log.write(black_box(&data)).unwrap());
    });
}

criterion_group!(
    benches,
    ring_log_write_throughput,
    ring_log_snapshot,
    sample_log_concurrent_appends,
    ring_log_wrap_around
);
criterion_main!(benches);
