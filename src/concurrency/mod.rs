//! Low-level concurrency building blocks shared by the worklists, barriers and
//! the in-memory transport.

pub mod atomic;
pub mod cache_padded;
pub mod channel;
pub mod spin;

pub use atomic::DirtyBitset;
pub use cache_padded::CachePadded;
pub use spin::{SpinLock, SpinLockGuard};
