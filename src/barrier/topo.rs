//! Topology-aware barrier.
//!
//! One tree node per package instead of per thread. Non-leader threads check
//! in by decrementing their package's counter; the package leader waits for
//! that counter (which also covers child packages) to reach zero and then
//! reports to the parent package. Release follows a binary tree of packages,
//! and every thread in a package spins on the package's shared sense word.
//! Thread 0 is the root leader and releases its own package directly.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::concurrency::CachePadded;
use crate::topology::Topology;

const ARITY: usize = 4;

#[derive(Debug, Default)]
struct PackageNode {
    parent: Option<usize>,
    wake: [Option<usize>; 2],
    have_child: usize,
    child_not_ready: AtomicUsize,
    parent_sense: AtomicUsize,
}

/// Barrier whose tree follows package boundaries.
#[derive(Debug)]
pub struct TopoBarrier {
    topology: Topology,
    nodes: Box<[CachePadded<PackageNode>]>,
    sense: Box<[CachePadded<AtomicUsize>]>,
    threads: usize,
}

impl TopoBarrier {
    /// Barrier over `topology`, initialized for `threads`.
    pub fn new(topology: Topology, threads: usize) -> Self {
        let mut barrier = Self {
            nodes: (0..topology.packages())
                .map(|_| CachePadded::new(PackageNode::default()))
                .collect(),
            sense: (0..topology.max_threads())
                .map(|_| CachePadded::new(AtomicUsize::new(1)))
                .collect(),
            topology,
            threads: 0,
        };
        barrier.reinit(threads);
        barrier
    }

    /// Participating threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Maximum participants.
    pub fn capacity(&self) -> usize {
        self.topology.max_threads()
    }

    /// Rebuilds the package tree for threads `0..threads`.
    pub fn reinit(&mut self, threads: usize) {
        if threads == 0 || threads > self.topology.max_threads() {
            fatal!(
                "topology barrier places {} threads, asked for {}",
                self.topology.max_threads(),
                threads
            );
        }
        let packages = self.topology.packages_for(threads);
        let mut members = vec![0usize; packages];
        for tid in 0..threads {
            if !self.topology.is_leader(tid) {
                members[self.topology.package_of(tid)] += 1;
            }
        }
        for (i, node) in self.nodes.iter_mut().enumerate().take(packages) {
            let children = (1..=ARITY).filter(|j| ARITY * i + j < packages).count();
            node.parent = (i != 0).then(|| (i - 1) / ARITY);
            node.wake = [2 * i + 1, 2 * i + 2].map(|c| (c < packages).then_some(c));
            node.have_child = children + members[i];
            *node.child_not_ready.get_mut() = node.have_child;
            *node.parent_sense.get_mut() = 0;
        }
        for s in self.sense.iter_mut() {
            *s.get_mut() = 1;
        }
        self.threads = threads;
    }

    /// Blocks until all participants have called `wait` for this round.
    pub fn wait(&self, tid: usize) {
        if tid >= self.threads {
            fatal!("thread {} waited on a {}-thread barrier", tid, self.threads);
        }
        let pkg = self.topology.package_of(tid);
        let leader = self.topology.is_leader(tid);
        let node = &self.nodes[pkg];
        let sense = self.sense[tid].load(Ordering::Relaxed);
        let backoff = Backoff::new();

        if leader {
            while node.child_not_ready.load(Ordering::Acquire) != 0 {
                backoff.snooze();
            }
            node.child_not_ready.store(node.have_child, Ordering::Relaxed);
            if let Some(parent) = node.parent {
                self.nodes[parent].child_not_ready.fetch_sub(1, Ordering::AcqRel);
            }
        } else {
            node.child_not_ready.fetch_sub(1, Ordering::AcqRel);
        }

        if tid != 0 {
            backoff.reset();
            while node.parent_sense.load(Ordering::Acquire) != sense {
                backoff.snooze();
            }
        }

        if leader {
            for &child in node.wake.iter().flatten() {
                self.nodes[child].parent_sense.store(sense, Ordering::Release);
            }
            if tid == 0 {
                node.parent_sense.store(sense, Ordering::Release);
            }
        }
        self.sense[tid].store(sense.wrapping_add(1), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_cover_members_and_child_packages() {
        let topo = Topology::from_package_sizes(&[2, 2, 2]).unwrap();
        let b = TopoBarrier::new(topo, 5);
        // packages 0 and 1 full, package 2 has only its leader (tid 4)
        assert_eq!(b.nodes[0].have_child, 2 + 1);
        assert_eq!(b.nodes[1].have_child, 1);
        assert_eq!(b.nodes[2].have_child, 0);
        assert_eq!(b.nodes[2].parent, Some(0));
        assert_eq!(b.nodes[0].wake, [Some(1), Some(2)]);
    }

    #[test]
    fn single_thread_never_blocks() {
        let b = TopoBarrier::new(Topology::single_package(4), 1);
        for _ in 0..3 {
            b.wait(0);
        }
    }
}
