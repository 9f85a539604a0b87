//! Memory-budget interface consumed from the host application.
//!
//! Components that hold reclaimable standby memory implement
//! [`MemoryManager`]; a supervisor elsewhere decides when to call it.

/// Signed byte count; negative values make accounting underflow obvious.
pub type ByteCount = i64;

/// A tracker for one category of reclaimable memory.
pub trait MemoryManager {
    /// Coarse category name, e.g. `"worklist-chunks"`.
    fn memory_category(&self) -> &str;

    /// Releases standby memory, aiming for `goal` bytes.
    ///
    /// Returns the bytes actually freed. Less than `goal` only when the
    /// standby total was smaller than `goal`.
    fn free_standby_memory(&self, goal: ByteCount) -> ByteCount;
}
