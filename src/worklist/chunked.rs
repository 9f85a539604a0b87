//! Chunked work-stealing worklist.
//!
//! Layout per thread:
//! - a private *push* chunk that fills up item by item,
//! - a private *pop* chunk being drained,
//! - a shared overflow pool where full push chunks are sealed.
//!
//! A pop looks, in order, at the pop chunk, the thread's own overflow and
//! private push chunk, the siblings' overflow pools (stealing whole chunks),
//! and finally the global pool that holds work seeded from outside the loop.
//! Chunks only ever move by `Box`, so a chunk has exactly one owner at any
//! instant.

use std::collections::VecDeque;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{Chunk, Discipline, LocalQueue, Worklist};
use crate::concurrency::{CachePadded, SpinLock};
use crate::config::RuntimeConfig;
use crate::memory::{ByteCount, MemoryManager};

type Pool<T> = SpinLock<VecDeque<Box<Chunk<T>>>>;

/// Private chunks of one thread for one worklist.
///
/// Kept separate from [`ChunkedLocal`] so bucketed worklists can hold one per
/// bucket.
pub struct LocalChunks<T> {
    push: Option<Box<Chunk<T>>>,
    pop: Option<Box<Chunk<T>>>,
}

impl<T> Default for LocalChunks<T> {
    fn default() -> Self {
        Self { push: None, pop: None }
    }
}

impl<T> LocalChunks<T> {
    /// True if neither private chunk holds an item.
    pub fn is_empty(&self) -> bool {
        self.push.as_ref().map_or(true, |c| c.is_empty())
            && self.pop.as_ref().map_or(true, |c| c.is_empty())
    }
}

/// A chunked worklist shared by `threads` workers.
pub struct ChunkedWorklist<T> {
    capacity: usize,
    discipline: Discipline,
    overflow: Box<[CachePadded<Pool<T>>]>,
    global: Pool<T>,
    free: SpinLock<Vec<Box<Chunk<T>>>>,
    free_limit: usize,
    claimed: Box<[AtomicBool]>,
    allocated: AtomicUsize,
    stolen: AtomicUsize,
}

impl<T> ChunkedWorklist<T> {
    /// Creates a worklist for `threads` workers with `capacity` items per chunk.
    ///
    /// # Panics
    /// Panics if `threads` or `capacity` is zero.
    pub fn new(threads: usize, capacity: usize, discipline: Discipline) -> Self {
        assert!(threads != 0, "threads must be > 0");
        assert!(capacity != 0, "chunk capacity must be > 0");
        Self {
            capacity,
            discipline,
            overflow: (0..threads).map(|_| CachePadded::new(Pool::default())).collect(),
            global: Pool::default(),
            free: SpinLock::new(Vec::new()),
            free_limit: 64,
            claimed: (0..threads).map(|_| AtomicBool::new(false)).collect(),
            allocated: AtomicUsize::new(0),
            stolen: AtomicUsize::new(0),
        }
    }

    /// Worklist sized and tuned from `config`.
    pub fn with_config(config: &RuntimeConfig) -> Self {
        let mut wl = Self::new(config.threads, config.chunk_capacity, config.discipline);
        wl.free_limit = config.chunk_cache;
        wl
    }

    /// Number of worker slots.
    pub fn threads(&self) -> usize {
        self.overflow.len()
    }

    /// Items per chunk.
    pub fn chunk_capacity(&self) -> usize {
        self.capacity
    }

    /// Intra-chunk order.
    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Chunks allocated so far (recycled chunks are not counted again).
    pub fn chunks_allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Chunks taken from a sibling's overflow pool.
    pub fn chunks_stolen(&self) -> usize {
        self.stolen.load(Ordering::Relaxed)
    }

    /// True if no published chunk exists. Private chunks are not visible.
    pub fn is_empty(&self) -> bool {
        self.global.lock().is_empty() && self.overflow.iter().all(|p| p.lock().is_empty())
    }

    /// Adds `item` through thread `tid`'s private chunks.
    pub(crate) fn push_with(&self, local: &mut LocalChunks<T>, tid: usize, item: T) {
        let chunk = local.push.get_or_insert_with(|| self.fresh_chunk());
        chunk.push(item);
        if chunk.is_full() {
            if let Some(full) = local.push.take() {
                self.publish(tid, full);
            }
        }
    }

    /// Takes an item for thread `tid`, stealing if its own chunks are dry.
    pub(crate) fn pop_with(&self, local: &mut LocalChunks<T>, tid: usize) -> Option<T> {
        if let Some(item) = local.pop.as_mut().and_then(|c| c.pop(self.discipline)) {
            return Some(item);
        }
        if let Some(drained) = local.pop.take() {
            self.recycle(drained);
        }

        let mut next = match self.discipline {
            Discipline::Lifo => self
                .take_private(local)
                .or_else(|| self.take_own(tid)),
            Discipline::Fifo => self
                .take_own(tid)
                .or_else(|| self.take_private(local)),
        }
        .or_else(|| self.steal(tid))
        .or_else(|| self.take_global())?;

        let item = next.pop(self.discipline);
        local.pop = Some(next);
        item
    }

    /// Publishes both private chunks of `tid` to its overflow pool.
    pub(crate) fn flush_with(&self, local: &mut LocalChunks<T>, tid: usize) {
        for chunk in [local.pop.take(), local.push.take()].into_iter().flatten() {
            if chunk.is_empty() {
                self.recycle(chunk);
            } else {
                self.publish(tid, chunk);
            }
        }
    }

    fn fresh_chunk(&self) -> Box<Chunk<T>> {
        if let Some(chunk) = self.free.lock().pop() {
            return chunk;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Box::new(Chunk::new(self.capacity))
    }

    fn recycle(&self, chunk: Box<Chunk<T>>) {
        debug_assert!(chunk.is_empty());
        let mut free = self.free.lock();
        if free.len() < self.free_limit {
            free.push(chunk);
        }
    }

    fn publish(&self, tid: usize, chunk: Box<Chunk<T>>) {
        self.overflow[tid].lock().push_back(chunk);
    }

    fn take_from(&self, pool: &Pool<T>) -> Option<Box<Chunk<T>>> {
        let mut pool = pool.lock();
        match self.discipline {
            Discipline::Fifo => pool.pop_front(),
            Discipline::Lifo => pool.pop_back(),
        }
    }

    fn take_own(&self, tid: usize) -> Option<Box<Chunk<T>>> {
        self.take_from(&self.overflow[tid])
    }

    fn take_private(&self, local: &mut LocalChunks<T>) -> Option<Box<Chunk<T>>> {
        let chunk = local.push.take()?;
        if chunk.is_empty() {
            local.push = Some(chunk);
            return None;
        }
        Some(chunk)
    }

    fn steal(&self, tid: usize) -> Option<Box<Chunk<T>>> {
        let n = self.overflow.len();
        for offset in 1..n {
            let victim = (tid + offset) % n;
            // Oldest chunk first, whatever our own discipline.
            if let Some(chunk) = self.overflow[victim].lock().pop_front() {
                self.stolen.fetch_add(1, Ordering::Relaxed);
                log_trace!("thread {} stole a chunk of {} from {}", tid, chunk.len(), victim);
                return Some(chunk);
            }
        }
        None
    }

    fn take_global(&self) -> Option<Box<Chunk<T>>> {
        self.take_from(&self.global)
    }

    fn chunk_bytes(&self) -> ByteCount {
        (mem::size_of::<Chunk<T>>() + self.capacity * mem::size_of::<T>()) as ByteCount
    }
}

impl<T: Send> ChunkedWorklist<T> {
    /// Seeds `items` into the global pool, packed into sealed chunks.
    pub fn push_initial<I: IntoIterator<Item = T>>(&self, items: I) {
        let mut sealed = Vec::new();
        let mut cur = self.fresh_chunk();
        for item in items {
            cur.push(item);
            if cur.is_full() {
                sealed.push(mem::replace(&mut cur, self.fresh_chunk()));
            }
        }
        if cur.is_empty() {
            self.recycle(cur);
        } else {
            sealed.push(cur);
        }
        self.global.lock().extend(sealed);
    }

    /// Handle for thread `tid`.
    ///
    /// # Panics
    /// Panics if `tid` is out of range or already has a live handle.
    pub fn local(&self, tid: usize) -> ChunkedLocal<'_, T> {
        if tid >= self.claimed.len() {
            fatal!("worklist thread {} out of range ({} slots)", tid, self.claimed.len());
        }
        if self.claimed[tid].swap(true, Ordering::AcqRel) {
            fatal!("worklist slot {} already has a live handle", tid);
        }
        ChunkedLocal {
            wl: self,
            tid,
            chunks: LocalChunks::default(),
        }
    }
}

impl<T: Send> Worklist<T> for ChunkedWorklist<T> {
    type Local<'a> = ChunkedLocal<'a, T> where Self: 'a;

    fn local(&self, tid: usize) -> ChunkedLocal<'_, T> {
        ChunkedWorklist::local(self, tid)
    }

    fn push_initial<I: IntoIterator<Item = T>>(&self, items: I) {
        ChunkedWorklist::push_initial(self, items);
    }
}

impl<T> MemoryManager for ChunkedWorklist<T> {
    fn memory_category(&self) -> &str {
        "worklist-chunks"
    }

    fn free_standby_memory(&self, goal: ByteCount) -> ByteCount {
        let per_chunk = self.chunk_bytes();
        let mut freed = 0;
        let mut free = self.free.lock();
        while freed < goal {
            match free.pop() {
                Some(chunk) => {
                    drop(chunk);
                    freed += per_chunk;
                }
                None => break,
            }
        }
        freed
    }
}

/// Thread-owned handle onto a [`ChunkedWorklist`].
///
/// Dropping the handle publishes any private items.
pub struct ChunkedLocal<'a, T> {
    wl: &'a ChunkedWorklist<T>,
    tid: usize,
    chunks: LocalChunks<T>,
}

impl<T> ChunkedLocal<'_, T> {
    /// The thread id this handle was issued for.
    pub fn tid(&self) -> usize {
        self.tid
    }
}

impl<T> LocalQueue<T> for ChunkedLocal<'_, T> {
    #[inline]
    fn push(&mut self, item: T) {
        self.wl.push_with(&mut self.chunks, self.tid, item);
    }

    #[inline]
    fn pop(&mut self) -> Option<T> {
        self.wl.pop_with(&mut self.chunks, self.tid)
    }

    fn flush(&mut self) {
        self.wl.flush_with(&mut self.chunks, self.tid);
    }
}

impl<T> Drop for ChunkedLocal<'_, T> {
    fn drop(&mut self) {
        self.wl.flush_with(&mut self.chunks, self.tid);
        self.wl.claimed[self.tid].store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_thread_drains_everything() {
        let wl = ChunkedWorklist::new(1, 4, Discipline::Fifo);
        let mut q = wl.local(0);
        for i in 0..10 {
            q.push(i);
        }
        let mut out: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        out.sort_unstable();
        assert_eq!(out, (0..10).collect::<Vec<_>>());
        assert!(q.pop().is_none());
    }

    #[test]
    fn fifo_within_one_chunk() {
        let wl = ChunkedWorklist::new(1, 8, Discipline::Fifo);
        let mut q = wl.local(0);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.pop(), Some(0));
        assert_eq!(q.pop(), Some(1));
    }

    #[test]
    fn lifo_within_one_chunk() {
        let wl = ChunkedWorklist::new(1, 8, Discipline::Lifo);
        let mut q = wl.local(0);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.pop(), Some(4));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn full_chunks_are_stealable() {
        let wl = ChunkedWorklist::new(2, 2, Discipline::Fifo);
        let mut owner = wl.local(0);
        for i in 0..4 {
            owner.push(i);
        }
        let mut thief = wl.local(1);
        let got = thief.pop();
        assert!(got.is_some());
        assert_eq!(wl.chunks_stolen(), 1);
    }

    #[test]
    fn private_partial_chunk_is_published_on_flush() {
        let wl = ChunkedWorklist::new(2, 8, Discipline::Fifo);
        let mut owner = wl.local(0);
        owner.push(7);
        let mut thief = wl.local(1);
        assert_eq!(thief.pop(), None);
        owner.flush();
        assert_eq!(thief.pop(), Some(7));
    }

    #[test]
    fn dropped_handle_leaves_items_for_others() {
        let wl = ChunkedWorklist::new(2, 8, Discipline::Lifo);
        {
            let mut owner = wl.local(0);
            owner.push(1);
            owner.push(2);
        }
        let mut other = wl.local(1);
        let mut got = vec![other.pop().unwrap(), other.pop().unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn initial_work_comes_from_global_pool() {
        let wl = ChunkedWorklist::new(3, 4, Discipline::Fifo);
        wl.push_initial(0..9);
        let mut q = wl.local(2);
        let mut out: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        out.sort_unstable();
        assert_eq!(out, (0..9).collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "live handle")]
    fn double_claim_is_fatal() {
        let wl = ChunkedWorklist::<u32>::new(1, 4, Discipline::Fifo);
        let _a = wl.local(0);
        let _b = wl.local(0);
    }

    #[test]
    fn drained_chunks_are_recycled_and_releasable() {
        let wl = ChunkedWorklist::new(1, 2, Discipline::Fifo);
        {
            let mut q = wl.local(0);
            for round in 0..3 {
                for i in 0..6 {
                    q.push(round * 10 + i);
                }
                while q.pop().is_some() {}
            }
        }
        assert!(wl.chunks_allocated() <= 5, "allocated {}", wl.chunks_allocated());
        let freed = wl.free_standby_memory(ByteCount::MAX);
        assert!(freed > 0);
        assert_eq!(wl.free_standby_memory(ByteCount::MAX), 0);
        assert_eq!(wl.memory_category(), "worklist-chunks");
    }
}
