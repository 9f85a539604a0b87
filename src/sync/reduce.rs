//! Combiners and atomic update helpers for reducible fields.
//!
//! Reduce rounds apply contributions in whatever order messages arrive, and
//! compute threads may update the same master concurrently, so every combiner
//! here is associative and commutative and every helper is a single atomic
//! read-modify-write.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use num_traits::{Bounded, Zero};

/// An associative, commutative merge with an identity.
pub trait ReduceOp<T: Copy> {
    /// Value that leaves every other value unchanged.
    fn identity() -> T;

    /// Merges two contributions.
    fn combine(a: T, b: T) -> T;

    /// Folds `values` starting from the identity.
    fn fold<I: IntoIterator<Item = T>>(values: I) -> T {
        values.into_iter().fold(Self::identity(), Self::combine)
    }
}

/// Addition.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl<T: Zero + Copy> ReduceOp<T> for Sum {
    fn identity() -> T {
        T::zero()
    }

    fn combine(a: T, b: T) -> T {
        a + b
    }
}

/// Minimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

impl<T: Bounded + PartialOrd + Copy> ReduceOp<T> for Min {
    fn identity() -> T {
        T::max_value()
    }

    fn combine(a: T, b: T) -> T {
        if b < a {
            b
        } else {
            a
        }
    }
}

/// Maximum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

impl<T: Bounded + PartialOrd + Copy> ReduceOp<T> for Max {
    fn identity() -> T {
        T::min_value()
    }

    fn combine(a: T, b: T) -> T {
        if b > a {
            b
        } else {
            a
        }
    }
}

/// Minimum on `(primary, tie)`, with ties on `primary` going to the smaller
/// `tie`. The result does not depend on the order contributions arrive in.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinTieBreak;

impl MinTieBreak {
    /// Packs a pair so that `u64` order is the lexicographic pair order.
    #[inline]
    pub const fn pack(primary: u32, tie: u32) -> u64 {
        ((primary as u64) << 32) | tie as u64
    }

    /// Inverse of [`pack`](Self::pack).
    #[inline]
    pub const fn unpack(packed: u64) -> (u32, u32) {
        ((packed >> 32) as u32, packed as u32)
    }
}

impl ReduceOp<(u32, u32)> for MinTieBreak {
    fn identity() -> (u32, u32) {
        (u32::MAX, u32::MAX)
    }

    fn combine(a: (u32, u32), b: (u32, u32)) -> (u32, u32) {
        a.min(b)
    }
}

/// A `(primary, tie)` pair updated with [`MinTieBreak`] semantics in one
/// atomic operation.
#[derive(Debug)]
pub struct TieBreakCell(AtomicU64);

impl Default for TieBreakCell {
    fn default() -> Self {
        Self(AtomicU64::new(u64::MAX))
    }
}

impl TieBreakCell {
    /// Cell holding `(primary, tie)`.
    pub fn new(primary: u32, tie: u32) -> Self {
        Self(AtomicU64::new(MinTieBreak::pack(primary, tie)))
    }

    /// Current pair.
    pub fn get(&self) -> (u32, u32) {
        MinTieBreak::unpack(self.0.load(Ordering::Acquire))
    }

    /// Overwrites the pair.
    pub fn set(&self, primary: u32, tie: u32) {
        self.0.store(MinTieBreak::pack(primary, tie), Ordering::Release);
    }

    /// Keeps the smaller of the current pair and `(primary, tie)`; `true` if
    /// the cell changed.
    pub fn offer(&self, primary: u32, tie: u32) -> bool {
        let packed = MinTieBreak::pack(primary, tie);
        self.0.fetch_min(packed, Ordering::AcqRel) > packed
    }

    /// Back to the identity.
    pub fn reset(&self) {
        self.0.store(u64::MAX, Ordering::Release);
    }
}

/// Stores `min(*a, v)`; `true` if `a` changed.
#[inline]
pub fn atomic_min_u32(a: &AtomicU32, v: u32) -> bool {
    a.fetch_min(v, Ordering::AcqRel) > v
}

/// Stores `min(*a, v)`; `true` if `a` changed.
#[inline]
pub fn atomic_min_u64(a: &AtomicU64, v: u64) -> bool {
    a.fetch_min(v, Ordering::AcqRel) > v
}

/// Adds `v` to the `f64` whose bits live in `a`; returns the previous value.
pub fn atomic_add_f64(a: &AtomicU64, v: f64) -> f64 {
    let mut cur = a.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(cur) + v).to_bits();
        match a.compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(prev) => return f64::from_bits(prev),
            Err(actual) => cur = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_from_identity() {
        assert_eq!(Sum::fold([1u32, 2, 3]), 6);
        assert_eq!(Min::fold([5i64, -2, 9]), -2);
        assert_eq!(Max::fold(Vec::<u8>::new()), 0);
        assert_eq!(MinTieBreak::fold([(3, 1), (3, 0), (4, 0)]), (3, 0));
    }

    #[test]
    fn tie_break_prefers_smaller_tie() {
        let cell = TieBreakCell::default();
        assert!(cell.offer(3, 1));
        assert!(cell.offer(3, 0));
        assert!(!cell.offer(3, 2));
        assert!(!cell.offer(3, 0));
        assert_eq!(cell.get(), (3, 0));
        assert!(cell.offer(2, 9));
        assert_eq!(cell.get(), (2, 9));
    }

    #[test]
    fn atomic_helpers_report_changes() {
        let a = AtomicU32::new(10);
        assert!(atomic_min_u32(&a, 4));
        assert!(!atomic_min_u32(&a, 4));
        let b = AtomicU64::new(0.5f64.to_bits());
        assert_eq!(atomic_add_f64(&b, 1.25), 0.5);
        assert_eq!(f64::from_bits(b.load(Ordering::Relaxed)), 1.75);
    }
}
