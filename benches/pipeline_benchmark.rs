//! Benchmarks comparing one-at-a-time commands with pipelines.
//!
//! Runs against the in-process mock server, so no Redis is needed:
//! ```bash
//! cargo bench --bench pipeline_benchmark --features test-utils
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use redpipe::testing::MockServer;
use redpipe::Client;
use tokio::runtime::Runtime;

fn setup(rt: &Runtime) -> (MockServer, Client) {
    rt.block_on(async {
        let server = MockServer::start().await.expect("failed to start mock server");
        let client = Client::connect(server.url())
            .await
            .expect("failed to connect");
        (server, client)
    })
}

/// Benchmark: N sequential SETs versus one pipeline of N SETs.
fn bench_sequential_vs_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_server, client) = setup(&rt);
    let mut group = c.benchmark_group("set_batch");

    for count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                for i in 0..count {
                    client
                        .set(black_box(&format!("bench:{i}")), "v")
                        .await
                        .expect("SET failed");
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("pipeline", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                let mut pipe = client.pipelined().await.expect("no pooled connection");
                for i in 0..count {
                    pipe.set(black_box(&format!("bench:{i}")), "v");
                }
                pipe.close().await.expect("pipeline failed");
            });
        });
    }

    group.finish();
}

/// Benchmark: MULTI/EXEC with a growing number of queued INCRs.
fn bench_transaction(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_server, client) = setup(&rt);
    let mut group = c.benchmark_group("transaction_incr");

    for count in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                let mut trans = client.multi().await.expect("no pooled connection");
                for _ in 0..count {
                    trans.incr("bench:counter").expect("not in MULTI");
                }
                trans.exec().await.expect("EXEC failed");
                trans.close().await.expect("close failed");
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sequential_vs_pipeline, bench_transaction);
criterion_main!(benches);
