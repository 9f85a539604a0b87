//! Soft-priority scheduling by integer buckets ("ordered by integer metric").
//!
//! Each item maps to `bucket = indexer(item) >> shift`; every bucket is its own
//! [`ChunkedWorklist`]. A thread drains its current bucket and, when that runs
//! dry, moves to the lowest bucket it can find with work, starting from a
//! shared estimate of the lowest non-empty bucket. Threads never wait for each
//! other to finish a bucket, so the global order is approximate: a thread may
//! run arbitrarily far ahead of the true minimum. Within one thread, pushes to
//! a lower bucket pull the thread back down immediately.
//!
//! Buckets are created on first push and stay allocated while any handle is
//! live, even once drained. [`OrderedByIntegerMetric::retire_empty_buckets`]
//! drops the empty ones between loops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::chunked::LocalChunks;
use super::{ChunkedWorklist, Discipline, LocalQueue, Worklist};
use crate::concurrency::SpinLock;
use crate::config::RuntimeConfig;

/// Maps a work item to its unsigned priority. Smaller runs earlier.
pub trait Indexer<T>: Sync {
    /// Priority of `item`.
    fn index(&self, item: &T) -> u64;
}

impl<T, F> Indexer<T> for F
where
    F: Fn(&T) -> u64 + Sync,
{
    #[inline]
    fn index(&self, item: &T) -> u64 {
        self(item)
    }
}

/// Bucketed worklist with soft priority order.
pub struct OrderedByIntegerMetric<T, I> {
    indexer: I,
    shift: u32,
    threads: usize,
    capacity: usize,
    discipline: Discipline,
    buckets: SpinLock<BTreeMap<u64, Arc<ChunkedWorklist<T>>>>,
    version: AtomicU64,
    lowest: AtomicU64,
    claimed: Box<[AtomicBool]>,
}

impl<T, I> OrderedByIntegerMetric<T, I>
where
    T: Send,
    I: Indexer<T>,
{
    /// Creates an empty bucketed worklist.
    ///
    /// `shift == 0` gives one bucket per priority value; a shift of 64 or more
    /// puts everything in bucket 0.
    pub fn new(threads: usize, capacity: usize, discipline: Discipline, indexer: I, shift: u32) -> Self {
        assert!(threads != 0, "threads must be > 0");
        Self {
            indexer,
            shift,
            threads,
            capacity,
            discipline,
            buckets: SpinLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            lowest: AtomicU64::new(u64::MAX),
            claimed: (0..threads).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Bucketed worklist using the thread count, chunking and shift of `config`.
    pub fn with_config(config: &RuntimeConfig, indexer: I) -> Self {
        Self::new(
            config.threads,
            config.chunk_capacity,
            config.discipline,
            indexer,
            config.bucket_shift,
        )
    }

    /// Bucket id for `item`.
    #[inline]
    pub fn bucket_of(&self, item: &T) -> u64 {
        self.indexer.index(item).checked_shr(self.shift).unwrap_or(0)
    }

    /// Number of buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Current estimate of the lowest non-empty bucket.
    pub fn lowest_estimate(&self) -> Option<u64> {
        match self.lowest.load(Ordering::Acquire) {
            u64::MAX => None,
            b => Some(b),
        }
    }

    /// Drops every bucket with no published work and returns how many went.
    ///
    /// Needs `&mut self`, so no handle is live and every private chunk has
    /// already been published.
    pub fn retire_empty_buckets(&mut self) -> usize {
        let map = self.buckets.get_mut();
        let before = map.len();
        map.retain(|_, list| !list.is_empty());
        let retired = before - map.len();
        *self.lowest.get_mut() = map.keys().next().copied().unwrap_or(u64::MAX);
        if retired > 0 {
            *self.version.get_mut() += 1;
            log_trace!("retired {} empty buckets, {} left", retired, map.len());
        }
        retired
    }

    fn bucket(&self, id: u64) -> Arc<ChunkedWorklist<T>> {
        let mut map = self.buckets.lock();
        let list = map.entry(id).or_insert_with(|| {
            self.version.fetch_add(1, Ordering::AcqRel);
            Arc::new(ChunkedWorklist::new(self.threads, self.capacity, self.discipline))
        });
        Arc::clone(list)
    }

    fn note_work(&self, bucket: u64) {
        self.lowest.fetch_min(bucket, Ordering::AcqRel);
    }

    /// Seeds items from outside the worker threads.
    pub fn push_initial<It: IntoIterator<Item = T>>(&self, items: It) {
        let mut grouped: BTreeMap<u64, Vec<T>> = BTreeMap::new();
        for item in items {
            grouped.entry(self.bucket_of(&item)).or_default().push(item);
        }
        for (id, items) in grouped {
            self.bucket(id).push_initial(items);
            self.note_work(id);
        }
    }

    /// Handle for thread `tid`.
    ///
    /// # Panics
    /// Panics if `tid` is out of range or already has a live handle.
    pub fn local(&self, tid: usize) -> ObimLocal<'_, T, I> {
        if tid >= self.threads {
            fatal!("bucketed worklist thread {} out of range ({} threads)", tid, self.threads);
        }
        if self.claimed[tid].swap(true, Ordering::AcqRel) {
            fatal!("bucketed worklist slot {} already has a live handle", tid);
        }
        ObimLocal {
            wl: self,
            tid,
            slots: BTreeMap::new(),
            seen_version: u64::MAX,
            current: None,
        }
    }
}

impl<T, I> Worklist<T> for OrderedByIntegerMetric<T, I>
where
    T: Send,
    I: Indexer<T>,
{
    type Local<'a> = ObimLocal<'a, T, I> where Self: 'a;

    fn local(&self, tid: usize) -> ObimLocal<'_, T, I> {
        OrderedByIntegerMetric::local(self, tid)
    }

    fn push_initial<It: IntoIterator<Item = T>>(&self, items: It) {
        OrderedByIntegerMetric::push_initial(self, items);
    }
}

struct BucketSlot<T> {
    list: Arc<ChunkedWorklist<T>>,
    chunks: LocalChunks<T>,
}

/// Thread-owned handle onto an [`OrderedByIntegerMetric`].
///
/// Caches the bucket table so the common push/pop path never takes the
/// shared lock.
pub struct ObimLocal<'a, T, I> {
    wl: &'a OrderedByIntegerMetric<T, I>,
    tid: usize,
    slots: BTreeMap<u64, BucketSlot<T>>,
    seen_version: u64,
    current: Option<u64>,
}

impl<T, I> ObimLocal<'_, T, I>
where
    T: Send,
    I: Indexer<T>,
{
    /// Bucket this thread is currently draining.
    pub fn current_bucket(&self) -> Option<u64> {
        self.current
    }

    fn slot(&mut self, id: u64) -> &mut BucketSlot<T> {
        let wl = self.wl;
        self.slots.entry(id).or_insert_with(|| BucketSlot {
            list: wl.bucket(id),
            chunks: LocalChunks::default(),
        })
    }

    fn refresh(&mut self) {
        let version = self.wl.version.load(Ordering::Acquire);
        if version == self.seen_version {
            return;
        }
        let map = self.wl.buckets.lock();
        for (&id, list) in map.iter() {
            self.slots.entry(id).or_insert_with(|| BucketSlot {
                list: Arc::clone(list),
                chunks: LocalChunks::default(),
            });
        }
        self.seen_version = version;
    }

    fn scan_from(&mut self, start: u64) -> Option<(u64, T)> {
        let tid = self.tid;
        for (&id, slot) in self.slots.range_mut(start..) {
            if let Some(item) = slot.list.pop_with(&mut slot.chunks, tid) {
                return Some((id, item));
            }
        }
        None
    }
}

impl<T, I> LocalQueue<T> for ObimLocal<'_, T, I>
where
    T: Send,
    I: Indexer<T>,
{
    fn push(&mut self, item: T) {
        let id = self.wl.bucket_of(&item);
        let tid = self.tid;
        let slot = self.slot(id);
        slot.list.push_with(&mut slot.chunks, tid, item);
        self.wl.note_work(id);
        if self.current.map_or(true, |cur| id < cur) {
            self.current = Some(id);
        }
    }

    fn pop(&mut self) -> Option<T> {
        if let Some(cur) = self.current {
            let tid = self.tid;
            if let Some(slot) = self.slots.get_mut(&cur) {
                if let Some(item) = slot.list.pop_with(&mut slot.chunks, tid) {
                    return Some(item);
                }
            }
        }

        self.refresh();
        let hint = self.wl.lowest.load(Ordering::Acquire);
        let start = self.current.map_or(hint, |cur| cur.min(hint));
        let found = match self.scan_from(start) {
            Some(hit) => Some(hit),
            // The shared estimate can overshoot when a lower bucket is refilled
            // concurrently; rescan everything before reporting empty.
            None if start > 0 => self.scan_from(0),
            None => None,
        };

        match found {
            Some((id, item)) => {
                if id > hint {
                    let _ = self
                        .wl
                        .lowest
                        .compare_exchange(hint, id, Ordering::AcqRel, Ordering::Relaxed);
                }
                if self.current != Some(id) {
                    log_trace!("thread {} moved to bucket {}", self.tid, id);
                }
                self.current = Some(id);
                Some(item)
            }
            None => {
                self.current = None;
                None
            }
        }
    }

    fn flush(&mut self) {
        let tid = self.tid;
        for slot in self.slots.values_mut() {
            slot.list.flush_with(&mut slot.chunks, tid);
        }
    }
}

impl<T, I> Drop for ObimLocal<'_, T, I> {
    fn drop(&mut self) {
        let tid = self.tid;
        for slot in self.slots.values_mut() {
            slot.list.flush_with(&mut slot.chunks, tid);
        }
        self.wl.claimed[tid].store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_value(x: &u64) -> u64 {
        *x
    }

    #[test]
    fn single_thread_pops_buckets_in_order() {
        let wl = OrderedByIntegerMetric::new(1, 4, Discipline::Fifo, by_value, 2);
        let mut q = wl.local(0);
        for v in [13u64, 2, 9, 0, 6, 14, 1] {
            q.push(v);
        }
        let mut last_bucket = 0;
        while let Some(v) = q.pop() {
            let b = v >> 2;
            assert!(b >= last_bucket, "bucket {b} after {last_bucket}");
            last_bucket = b;
        }
        assert_eq!(wl.bucket_count(), 4);
    }

    #[test]
    fn lower_push_preempts_current_bucket() {
        let wl = OrderedByIntegerMetric::new(1, 4, Discipline::Fifo, by_value, 0);
        let mut q = wl.local(0);
        q.push(10);
        q.push(11);
        assert_eq!(q.pop(), Some(10));
        q.push(3);
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(11));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn huge_shift_collapses_to_one_bucket() {
        let wl = OrderedByIntegerMetric::new(1, 4, Discipline::Fifo, by_value, 64);
        wl.push_initial([u64::MAX, 0, 1 << 40]);
        assert_eq!(wl.bucket_count(), 1);
        let mut q = wl.local(0);
        assert_eq!(std::iter::from_fn(|| q.pop()).count(), 3);
    }

    #[test]
    fn work_pushed_by_another_thread_is_found() {
        let wl = OrderedByIntegerMetric::new(2, 4, Discipline::Lifo, by_value, 1);
        {
            let mut a = wl.local(0);
            a.push(40);
            a.push(8);
        }
        let mut b = wl.local(1);
        let mut got = vec![b.pop().unwrap(), b.pop().unwrap()];
        got.sort_unstable();
        assert_eq!(got, vec![8, 40]);
        assert!(b.pop().is_none());
    }

    #[test]
    #[should_panic(expected = "live handle")]
    fn double_claim_is_fatal() {
        let wl = OrderedByIntegerMetric::new(2, 4, Discipline::Fifo, by_value, 0);
        let _a = wl.local(1);
        let _b = wl.local(1);
    }

    #[test]
    fn released_slot_can_be_claimed_again() {
        let wl = OrderedByIntegerMetric::new(1, 4, Discipline::Fifo, by_value, 0);
        wl.local(0).push(5);
        assert_eq!(wl.local(0).pop(), Some(5));
    }

    #[test]
    fn drained_buckets_are_retired() {
        let mut wl = OrderedByIntegerMetric::new(1, 4, Discipline::Fifo, by_value, 0);
        {
            let mut q = wl.local(0);
            for v in [1u64, 2, 3, 7] {
                q.push(v);
            }
            assert_eq!(q.pop(), Some(1));
            assert_eq!(q.pop(), Some(2));
        }
        assert_eq!(wl.bucket_count(), 4);
        assert_eq!(wl.retire_empty_buckets(), 2);
        assert_eq!(wl.bucket_count(), 2);
        assert_eq!(wl.lowest_estimate(), Some(3));

        let mut q = wl.local(0);
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), Some(7));
        assert_eq!(q.pop(), None);
        drop(q);
        assert_eq!(wl.retire_empty_buckets(), 2);
        assert_eq!(wl.lowest_estimate(), None);
    }
}
