//! Flat MCS-style tree barrier.
//!
//! Arrival runs up a 4-ary tree: thread `i` reports to `(i - 1) / 4` in slot
//! `(i - 1) % 4`. Release runs down a binary tree: thread `i` wakes `2i + 1`
//! and `2i + 2`. Every spin is on a flag owned by the spinning thread's node,
//! so waiting threads never share a cache line. Rounds alternate a per-node
//! sense bit, so the barrier can be reused without reinitialization.

use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::Backoff;

use crate::concurrency::CachePadded;

const ARITY: usize = 4;

#[derive(Debug)]
struct Node {
    parent: Option<(usize, usize)>,
    wake: [Option<usize>; 2],
    have_child: [bool; ARITY],
    child_not_ready: [AtomicBool; ARITY],
    parent_sense: AtomicBool,
    sense: AtomicBool,
}

impl Node {
    fn idle() -> Self {
        Self {
            parent: None,
            wake: [None; 2],
            have_child: [false; ARITY],
            child_not_ready: Default::default(),
            parent_sense: AtomicBool::new(false),
            sense: AtomicBool::new(true),
        }
    }

    fn configure(&mut self, i: usize, threads: usize) {
        self.parent = (i != 0).then(|| ((i - 1) / ARITY, (i - 1) % ARITY));
        self.wake = [2 * i + 1, 2 * i + 2].map(|c| (c < threads).then_some(c));
        for j in 0..ARITY {
            self.have_child[j] = ARITY * i + j + 1 < threads;
            *self.child_not_ready[j].get_mut() = self.have_child[j];
        }
        *self.parent_sense.get_mut() = false;
        *self.sense.get_mut() = true;
    }
}

/// Reusable barrier for threads `0..threads`.
#[derive(Debug)]
pub struct TreeBarrier {
    nodes: Box<[CachePadded<Node>]>,
    threads: usize,
}

impl TreeBarrier {
    /// Barrier with room for `capacity` threads, initialized for `threads`.
    pub fn new(capacity: usize, threads: usize) -> Self {
        let mut barrier = Self {
            nodes: (0..capacity).map(|_| CachePadded::new(Node::idle())).collect(),
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
        self.nodes.len()
    }

    /// Rebuilds the tree for `threads` participants.
    pub fn reinit(&mut self, threads: usize) {
        if threads == 0 || threads > self.nodes.len() {
            fatal!("tree barrier sized for {} threads, asked for {}", self.nodes.len(), threads);
        }
        for (i, node) in self.nodes.iter_mut().enumerate().take(threads) {
            node.configure(i, threads);
        }
        self.threads = threads;
    }

    /// Blocks until all participants have called `wait` for this round.
    ///
    /// Writes made by any participant before its call are visible to every
    /// participant after the call returns.
    pub fn wait(&self, tid: usize) {
        if tid >= self.threads {
            fatal!("thread {} waited on a {}-thread barrier", tid, self.threads);
        }
        let node = &self.nodes[tid];
        let backoff = Backoff::new();
        while node.child_not_ready.iter().any(|c| c.load(Ordering::Acquire)) {
            backoff.snooze();
        }
        for (flag, &have) in node.child_not_ready.iter().zip(&node.have_child) {
            flag.store(have, Ordering::Relaxed);
        }

        let sense = node.sense.load(Ordering::Relaxed);
        if let Some((parent, slot)) = node.parent {
            self.nodes[parent].child_not_ready[slot].store(false, Ordering::Release);
            backoff.reset();
            while node.parent_sense.load(Ordering::Acquire) != sense {
                backoff.snooze();
            }
        }
        for &child in node.wake.iter().flatten() {
            self.nodes[child].parent_sense.store(sense, Ordering::Release);
        }
        node.sense.store(!sense, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_of_a_ten_thread_tree() {
        let b = TreeBarrier::new(16, 10);
        assert_eq!(b.nodes[0].parent, None);
        assert_eq!(b.nodes[5].parent, Some((1, 0)));
        assert_eq!(b.nodes[9].parent, Some((2, 0)));
        assert_eq!(b.nodes[0].have_child, [true; 4]);
        assert_eq!(b.nodes[2].have_child, [true, false, false, false]);
        assert_eq!(b.nodes[4].wake, [Some(9), None]);
    }

    #[test]
    fn single_thread_never_blocks() {
        let b = TreeBarrier::new(4, 1);
        for _ in 0..3 {
            b.wait(0);
        }
    }

    #[test]
    #[should_panic(expected = "sized for 4 threads")]
    fn reinit_beyond_capacity_is_fatal() {
        TreeBarrier::new(4, 5);
    }
}
