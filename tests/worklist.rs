use std::sync::atomic::{AtomicUsize, Ordering};

use parsync::worklist::{ChunkedWorklist, Discipline, LocalQueue, OrderedByIntegerMetric};
use parsync::{Runtime, RuntimeConfig};
use proptest::prelude::*;

fn runtime(threads: usize) -> Runtime {
    let config = RuntimeConfig {
        packages: Some(vec![threads]),
        ..RuntimeConfig::with_threads(threads)
    };
    Runtime::new(config).unwrap()
}

/// Pops until every thread has seen the queue empty while nothing is left
/// in flight.
fn drain_all<W>(rt: &Runtime, wl: &W, expected: usize) -> Vec<Vec<u32>>
where
    W: parsync::worklist::Worklist<u32>,
{
    let taken = AtomicUsize::new(0);
    rt.on_each(|tid| {
        let mut q = wl.local(tid);
        let mut mine = Vec::new();
        while taken.load(Ordering::Acquire) < expected {
            if let Some(v) = q.pop() {
                mine.push(v);
                taken.fetch_add(1, Ordering::AcqRel);
            } else {
                std::hint::spin_loop();
            }
        }
        mine
    })
}

#[test]
fn ten_items_from_one_thread_reach_four_threads() {
    let rt = runtime(4);
    let wl = ChunkedWorklist::new(4, 2, Discipline::Fifo);
    {
        let mut q = wl.local(0);
        for i in 0..10u32 {
            q.push(i);
        }
    }
    let per_thread = drain_all(&rt, &wl, 10);
    let mut all: Vec<u32> = per_thread.into_iter().flatten().collect();
    all.sort_unstable();
    assert_eq!(all, (0..10).collect::<Vec<_>>());
    assert!(wl.is_empty());
}

#[test]
fn lifo_and_fifo_order_within_a_chunk() {
    for (discipline, expected) in [(Discipline::Fifo, [1, 2, 3]), (Discipline::Lifo, [3, 2, 1])] {
        let wl = ChunkedWorklist::new(1, 8, discipline);
        let mut q = wl.local(0);
        for v in 1..=3 {
            q.push(v);
        }
        let got: Vec<i32> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(got, expected);
    }
}

#[test]
fn for_each_grows_and_terminates() {
    let rt = runtime(4);
    let wl = rt.chunked_worklist::<u32>();
    let visits = AtomicUsize::new(0);
    // a binary tree of depth 10, expanded from the root
    let report = rt.for_each(&wl, [1u32], |node, ctx| {
        visits.fetch_add(1, Ordering::Relaxed);
        if node < 1 << 10 {
            ctx.push(2 * node);
            ctx.push(2 * node + 1);
        }
    });
    assert_eq!(visits.load(Ordering::Relaxed), (1 << 11) - 1);
    assert_eq!(report.processed(), (1 << 11) - 1);
    assert_eq!(report.per_thread.len(), 4);
}

#[test]
fn obim_for_each_visits_everything() {
    let rt = runtime(3);
    let wl = rt.obim_worklist(|x: &u32| u64::from(*x / 4));
    let seen = AtomicUsize::new(0);
    let report = rt.for_each(&wl, (0..200u32).rev(), |x, ctx| {
        seen.fetch_add(1, Ordering::Relaxed);
        if x % 10 == 0 && x < 100 {
            ctx.push(x + 300);
        }
    });
    assert_eq!(seen.load(Ordering::Relaxed), 210);
    assert_eq!(report.pushed(), 10);
}

#[test]
fn single_thread_obim_is_monotone_without_new_pushes() {
    let wl = OrderedByIntegerMetric::new(1, 3, Discipline::Lifo, |x: &u64| *x, 3);
    wl.push_initial([70u64, 3, 44, 8, 9, 63, 0, 17]);
    let mut q = wl.local(0);
    let buckets: Vec<u64> = std::iter::from_fn(|| q.pop()).map(|v| v >> 3).collect();
    assert_eq!(buckets.len(), 8);
    assert!(buckets.windows(2).all(|w| w[0] <= w[1]), "{buckets:?}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_pops_never_double_consume(
        items in proptest::collection::vec(any::<u32>(), 0..300),
        capacity in 1usize..8,
        lifo in any::<bool>(),
    ) {
        let discipline = if lifo { Discipline::Lifo } else { Discipline::Fifo };
        let rt = runtime(4);
        let wl = ChunkedWorklist::new(4, capacity, discipline);
        let n = items.len();
        // split the pushes over all threads, then drain concurrently
        rt.on_each(|tid| {
            let mut q = wl.local(tid);
            for v in items.iter().skip(tid).step_by(4) {
                q.push(*v);
            }
        });
        let mut popped: Vec<u32> = drain_all(&rt, &wl, n).into_iter().flatten().collect();
        let mut pushed = items.clone();
        popped.sort_unstable();
        pushed.sort_unstable();
        prop_assert_eq!(popped, pushed);
    }
}
