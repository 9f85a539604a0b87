use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parsync::barrier::LocalBarrier;
use parsync::{BarrierKind, Topology};

const ROUNDS: u64 = 1_000;

/// `ROUNDS` back-to-back waits on every thread.
fn run_rounds(barrier: &LocalBarrier, threads: usize) {
    std::thread::scope(|s| {
        for tid in 1..threads {
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    barrier.wait(tid);
                }
            });
        }
        for _ in 0..ROUNDS {
            barrier.wait(0);
        }
    });
}

fn bench_barriers(c: &mut Criterion) {
    let mut group = c.benchmark_group("barrier_rounds");
    group.throughput(Throughput::Elements(ROUNDS));
    group.sample_size(10);

    let max = std::thread::available_parallelism().map_or(2, |n| n.get()).min(8);
    for threads in [2, 4, 8].into_iter().filter(|&t| t <= max) {
        let flat = Topology::single_package(threads);
        let halves = match Topology::from_package_sizes(&[threads / 2, threads - threads / 2]) {
            Ok(t) => t,
            Err(_) => continue,
        };
        for (name, kind, topology) in [
            ("tree", BarrierKind::Tree, &flat),
            ("topo", BarrierKind::Topo, &halves),
        ] {
            let barrier = LocalBarrier::build(kind, topology, threads);
            group.bench_with_input(BenchmarkId::new(name, threads), &threads, |b, &threads| {
                b.iter(|| run_rounds(&barrier, threads));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_barriers);
criterion_main!(benches);
