//! Atomic primitives.
//!
//! Atomics are re-exported from `loom` under `--cfg loom` so the bitset can be
//! model-checked; everything else uses `core` atomics directly.

pub mod bitset;

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicUsize, Ordering};

#[cfg(not(loom))]
pub(crate) use core::sync::atomic::{AtomicUsize, Ordering};

pub use bitset::DirtyBitset;
