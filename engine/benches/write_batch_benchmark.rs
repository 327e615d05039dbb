//! Criterion benchmarks for write batch commits.
//!
//! Run with: cargo bench
//! Results saved to: target/criterion/

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::time::Duration;
use tempfile::NamedTempFile;

use jobstore::protocol::State;
use jobstore::queue::{SqliteConfig, SqliteStorage};

/// Create a migrated storage on a temp file.
fn create_storage() -> (SqliteStorage, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let config = SqliteConfig {
        path: temp_file.path().to_path_buf(),
        wal_mode: true,
        synchronous: 0,
        cache_size: -16000,
        busy_timeout: Duration::from_secs(5),
    };
    let storage = SqliteStorage::new(config).unwrap();
    storage.migrate().unwrap();
    (storage, temp_file)
}

/// Benchmark the usual enqueue transition: state change, queue and counter.
fn bench_enqueue_transition(c: &mut Criterion) {
    let (storage, _temp) = create_storage();
    let state = State::new("Enqueued")
        .with_reason("Triggered by benchmark")
        .with_data("Queue", "default");

    let mut group = c.benchmark_group("write_batch_enqueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single", |b| {
        b.iter(|| {
            let job_id = storage
                .create_job(&json!({"task": "benchmark"}), None)
                .unwrap();
            storage
                .commit_batch(|batch| {
                    batch.set_job_state(job_id, &state);
                    batch.add_to_queue("default", job_id);
                    batch.increment_counter("stats:enqueued");
                })
                .unwrap()
        })
    });

    group.finish();
}

/// Benchmark batches of set/list/counter commands of increasing size.
fn bench_batch_sizes(c: &mut Criterion) {
    let (storage, _temp) = create_storage();

    let mut group = c.benchmark_group("write_batch_size");
    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                storage
                    .commit_batch(|batch| {
                        for i in 0..size {
                            let value = i.to_string();
                            batch.add_to_set_with_score("schedule", &value, i as f64);
                            batch.insert_to_list("history", &value);
                            batch.increment_counter("stats:bench");
                        }
                        batch.trim_list("history", 0, 99);
                    })
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_enqueue_transition, bench_batch_sizes);
criterion_main!(benches);
