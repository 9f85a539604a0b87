use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parsync::worklist::Discipline;
use parsync::{ChunkedWorklist, OrderedByIntegerMetric, Runtime, RuntimeConfig};

const DEPTH: u32 = 14;

fn runtime(threads: usize) -> Runtime {
    let config = RuntimeConfig {
        packages: Some(vec![threads]),
        ..RuntimeConfig::with_threads(threads)
    };
    Runtime::new(config).unwrap()
}

/// Expands a complete binary tree from its root: `2^(DEPTH+1) - 1` items, all
/// but the root pushed from inside the loop.
fn bench_tree_expansion(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_expansion");
    group.throughput(Throughput::Elements((1u64 << (DEPTH + 1)) - 1));
    group.sample_size(20);

    for threads in [1, 2, 4] {
        let rt = runtime(threads);
        group.bench_with_input(BenchmarkId::new("chunked", threads), &threads, |b, _| {
            b.iter(|| {
                let wl: ChunkedWorklist<u32> = rt.chunked_worklist();
                let sum = AtomicU64::new(0);
                rt.for_each(&wl, [1u32], |n, ctx| {
                    sum.fetch_add(u64::from(n), Ordering::Relaxed);
                    if n < 1 << DEPTH {
                        ctx.push(2 * n);
                        ctx.push(2 * n + 1);
                    }
                });
                black_box(sum.into_inner())
            });
        });
        group.bench_with_input(BenchmarkId::new("obim", threads), &threads, |b, _| {
            b.iter(|| {
                let wl = OrderedByIntegerMetric::new(threads, 64, Discipline::Fifo, |n: &u32| u64::from(n.ilog2()), 0);
                let sum = AtomicU64::new(0);
                rt.for_each(&wl, [1u32], |n, ctx| {
                    sum.fetch_add(u64::from(n), Ordering::Relaxed);
                    if n < 1 << DEPTH {
                        ctx.push(2 * n);
                        ctx.push(2 * n + 1);
                    }
                });
                black_box(sum.into_inner())
            });
        });
    }
    group.finish();
}

/// Single-thread push/pop cost of one chunk size.
fn bench_local_queue(c: &mut Criterion) {
    use parsync::worklist::LocalQueue;

    let mut group = c.benchmark_group("local_queue");
    group.throughput(Throughput::Elements(10_000));
    for capacity in [8, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            let wl = ChunkedWorklist::new(1, capacity, Discipline::Lifo);
            b.iter(|| {
                let mut q = wl.local(0);
                for i in 0..10_000u32 {
                    q.push(i);
                }
                while let Some(v) = q.pop() {
                    black_box(v);
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tree_expansion, bench_local_queue);
criterion_main!(benches);
