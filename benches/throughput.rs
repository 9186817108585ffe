//! Splice and stats benchmarks for the ya-proxy data path.
//!
//! Run with: `cargo bench --bench throughput`
//!
//! Targets:
//! - In-memory splice: >5Gbps with 64KB buffers
//! - Stats snapshot: <1us

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;
use ya_proxy::connection::ConnectionStats;
use ya_proxy::io::{splice, SpliceOptions, DEFAULT_BUFFER_SIZE};

// ============================================================================
// Helper Functions
// ============================================================================

/// Create a tokio runtime for async benchmarks.
fn create_runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to create runtime")
}

/// Generate test data of specified size.
fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Push `data` from a fake client through a splice to a fake upstream that
/// drains it, then closes.
async fn splice_once(data: &[u8], buffer_size: usize) -> u64 {
    let (mut client_user, client_proxy) = duplex(buffer_size);
    let (upstream_proxy, mut upstream_user) = duplex(buffer_size);

    let options = SpliceOptions {
        buffer_size,
        ..SpliceOptions::default()
    };
    let bridge = tokio::spawn(async move { splice(client_proxy, upstream_proxy, &options).await });

    let payload = data.to_vec();
    let writer = tokio::spawn(async move {
        client_user.write_all(&payload).await.unwrap();
        client_user.shutdown().await.unwrap();
        client_user
    });

    let mut sink = Vec::with_capacity(data.len());
    upstream_user.read_to_end(&mut sink).await.unwrap();
    drop(upstream_user);

    let _client = writer.await.unwrap();
    bridge.await.unwrap().forward_bytes
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_splice(c: &mut Criterion) {
    let rt = create_runtime();
    let mut group = c.benchmark_group("splice");

    for size in [64 * 1024, 1024 * 1024] {
        let data = generate_test_data(size);
        group.throughput(Throughput::Bytes(size as u64));

        for buffer_size in [DEFAULT_BUFFER_SIZE, 64 * 1024] {
            group.bench_with_input(
                BenchmarkId::new(format!("{}KB_payload", size / 1024), buffer_size),
                &buffer_size,
                |b, &buffer_size| {
                    b.iter(|| rt.block_on(splice_once(black_box(&data), buffer_size)));
                },
            );
        }
    }

    group.finish();
}

fn bench_stats(c: &mut Criterion) {
    let stats = ConnectionStats::new();
    for _ in 0..1000 {
        stats.record_accepted();
        stats.record_completed(1500, 64_000);
    }

    c.bench_function("stats_snapshot", |b| b.iter(|| black_box(stats.snapshot())));
    c.bench_function("stats_record_completed", |b| {
        b.iter(|| stats.record_completed(black_box(1500), black_box(64_000)));
    });
}

criterion_group!(benches, bench_splice, bench_stats);
criterion_main!(benches);
