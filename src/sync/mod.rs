//! Master/mirror field synchronization.
//!
//! After a compute phase, mirrors hold local contributions and masters hold
//! local updates. A reduce round ships dirty mirror values to their owners,
//! which merge them with the field's `reduce`. A broadcast round ships dirty
//! master values to every mirror, which take them verbatim. Only nodes marked
//! in the caller's [`DirtyBitset`](crate::concurrency::DirtyBitset) travel,
//! and values that report [`is_noop`](crate::net::WireValue::is_noop) are
//! skipped even then.
//!
//! Every peer receives exactly one message per round, possibly empty, so a
//! round completes without any separate termination exchange.

pub mod engine;
pub mod field;
pub mod message;
pub mod reduce;

pub use engine::SyncEngine;
pub use field::{BroadcastField, ReduceField};
pub use message::CommMode;
pub use reduce::{atomic_add_f64, atomic_min_u32, atomic_min_u64, Max, Min, MinTieBreak, ReduceOp, Sum, TieBreakCell};

use serde::Serialize;

/// Traffic counters for one or more sync rounds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Rounds run.
    pub rounds: u64,
    /// Messages sent, including empty ones.
    pub messages_sent: u64,
    /// Messages that used the dense layout.
    pub dense_messages: u64,
    /// Bytes sent, excluding transport framing.
    pub bytes_sent: u64,
    /// Node values sent.
    pub entries_sent: u64,
    /// Node values received and applied.
    pub entries_received: u64,
}

impl SyncStats {
    /// Adds `other` into `self`.
    pub fn merge(&mut self, other: &SyncStats) {
        self.rounds += other.rounds;
        self.messages_sent += other.messages_sent;
        self.dense_messages += other.dense_messages;
        self.bytes_sent += other.bytes_sent;
        self.entries_sent += other.entries_sent;
        self.entries_received += other.entries_received;
    }
}
