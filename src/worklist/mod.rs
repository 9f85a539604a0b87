//! Worklists for irregular parallel loops.
//!
//! A worklist is shared by all threads of a loop; each thread talks to it
//! through its own [`LocalQueue`] handle. The handle owns the thread's private
//! chunks, so the hot push/pop path touches no shared state until a chunk
//! fills up or runs dry.
//!
//! Two implementations:
//! - [`ChunkedWorklist`]: per-thread chunks, stealable overflow pools, and a
//!   global pool for work seeded from outside the loop.
//! - [`OrderedByIntegerMetric`]: soft-priority buckets, each backed by a
//!   [`ChunkedWorklist`].
//!
//! Neither promises an order across chunks or threads. Operators must be
//! correct under any interleaving.

pub mod chunk;
pub mod chunked;
pub mod obim;

pub use chunk::Chunk;
pub use chunked::{ChunkedLocal, ChunkedWorklist};
pub use obim::{Indexer, ObimLocal, OrderedByIntegerMetric};

use serde::{Deserialize, Serialize};

/// Order in which items leave a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    /// Oldest item in the chunk first.
    #[default]
    Fifo,
    /// Newest item in the chunk first.
    Lifo,
}

/// A thread's view of a shared worklist.
pub trait LocalQueue<T> {
    /// Adds an item. Never fails.
    fn push(&mut self, item: T);

    /// Takes an item from anywhere in the worklist.
    ///
    /// `None` means no item was reachable at the time of the call: the local
    /// chunks, every sibling's overflow and the global pool were all empty.
    fn pop(&mut self) -> Option<T>;

    /// Publishes privately held items so other threads can steal them.
    fn flush(&mut self);
}

/// A worklist shared by the threads of one parallel loop.
pub trait Worklist<T: Send>: Sync {
    /// Per-thread handle type.
    type Local<'a>: LocalQueue<T>
    where
        Self: 'a;

    /// Handle for thread `tid`.
    fn local(&self, tid: usize) -> Self::Local<'_>;

    /// Seeds items from outside the worker threads.
    fn push_initial<I: IntoIterator<Item = T>>(&self, items: I);
}
