//! # `parsync` - Parallel and distributed graph runtime
//!
//! Schedules irregular, dynamically growing work across the threads of one
//! host, delimits phases with barriers, and keeps per-node state consistent
//! when a graph is partitioned across hosts.
//!
//! ## Architecture
//!
//! 1. **Worklists** ([`worklist`]): per-thread chunks with stealable overflow
//!    pools, optionally routed through soft-priority integer buckets.
//! 2. **Barriers** ([`barrier`]): a flat MCS-style tree, a package-aware tree,
//!    and a distributed variant that drains the network while it waits.
//! 3. **Field synchronization** ([`sync`]): reduce rounds (mirrors to master)
//!    and broadcast rounds (master to mirrors) that move only dirty values.
//!
//! Everything hangs off an explicit [`Runtime`]; there is no global state, so
//! several runtimes can share a process. [`net::MemoryCluster`] connects such
//! runtimes in memory, which is how multi-host runs are tested.
//!
//! ## A superstep
//!
//! ```text
//! compute (for_each) -> barrier -> sync_reduce / sync_broadcast -> barrier -> ...
//! ```
//!
//! The barrier is the only thing that separates a compute phase from the
//! values a sync round is writing. Termination is usually detected with a
//! [`net::Accumulator`] counting work done in the last round.
//!
//! ## Failure model
//!
//! Recoverable problems at the boundary (configuration, partition inputs,
//! handler registration) come back as [`Error`]. Broken invariants inside the
//! runtime (a barrier misused, an update for a node this host does not hold, a
//! malformed peer message) panic; release builds abort on panic.

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]

#[macro_use]
mod log;

pub mod barrier;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod graph;
pub mod memory;
pub mod net;
pub mod runtime;
pub mod sync;
pub mod topology;
pub mod worklist;

pub use barrier::{Barrier, BarrierKind};
pub use concurrency::DirtyBitset;
pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use graph::{GraphPartition, PartitionBuilder, PartitionPlan};
pub use net::{Accumulator, MemoryCluster, Network};
pub use runtime::{LoopReport, Runtime, UserContext};
pub use sync::{BroadcastField, ReduceField, SyncEngine, SyncStats};
pub use topology::Topology;
pub use worklist::{ChunkedWorklist, Discipline, OrderedByIntegerMetric};
