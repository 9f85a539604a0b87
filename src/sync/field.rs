//! Contracts between algorithm code and the sync engine.
//!
//! A field is a typed slice of per-node state. Node data is shared between
//! compute threads and the engine, so implementations update it through
//! interior mutability, usually atomics.

use crate::graph::LocalId;
use crate::net::WireValue;

/// A field whose mirror contributions are merged into the master.
pub trait ReduceField<N>: Sync {
    /// Value shipped per node.
    type Value: WireValue;

    /// Stable name; every host must use the same one.
    fn name(&self) -> &str;

    /// Reads the value a mirror contributes this round.
    fn extract(&self, lid: LocalId, node: &N) -> Self::Value;

    /// Merges `value` into master `node`; `true` if the master changed.
    ///
    /// Must be associative and commutative.
    fn reduce(&self, lid: LocalId, node: &N, value: Self::Value) -> bool;

    /// Clears a mirror's accumulated contribution after it was sent.
    fn reset(&self, lid: LocalId, node: &N);

    /// Bulk extract-then-reset. `None` falls back to the per-node path.
    fn extract_reset_batch(&self, _lids: &[LocalId], _nodes: &[N]) -> Option<Vec<Self::Value>> {
        None
    }

    /// Bulk reduce; returns per-entry change flags. `None` falls back to the
    /// per-node path.
    fn reduce_batch(&self, _lids: &[LocalId], _nodes: &[N], _values: &[Self::Value]) -> Option<Vec<bool>> {
        None
    }
}

/// A field whose master value overwrites every mirror.
pub trait BroadcastField<N>: Sync {
    /// Value shipped per node.
    type Value: WireValue;

    /// Stable name; every host must use the same one.
    fn name(&self) -> &str;

    /// Reads a master's current value.
    fn extract(&self, lid: LocalId, node: &N) -> Self::Value;

    /// Overwrites a mirror.
    fn set_val(&self, lid: LocalId, node: &N, value: Self::Value);

    /// Bulk extract. `None` falls back to the per-node path.
    fn extract_batch(&self, _lids: &[LocalId], _nodes: &[N]) -> Option<Vec<Self::Value>> {
        None
    }

    /// Bulk overwrite; `false` falls back to the per-node path.
    fn set_val_batch(&self, _lids: &[LocalId], _nodes: &[N], _values: &[Self::Value]) -> bool {
        false
    }
}

/// 32-bit FNV-1a of a field name, carried in message headers.
pub(crate) fn field_id(name: &str) -> u32 {
    name.bytes().fold(0x811c_9dc5u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193))
}
