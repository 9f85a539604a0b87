//! Fixed-capacity chunk of work items.

use std::collections::VecDeque;

use super::Discipline;

/// A bounded run of items owned by one thread or one pool at a time.
///
/// Chunks move as `Box<Chunk<T>>`, so handing one to another thread is a
/// pointer move, never a copy or a shared borrow.
#[derive(Debug)]
pub struct Chunk<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Chunk<T> {
    /// Allocates an empty chunk. Allocation failure aborts the process.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity != 0, "chunk capacity must be > 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if no items are held.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True once `len() == capacity()`.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Appends an item.
    ///
    /// # Panics
    /// Panics if the chunk is already full.
    #[inline]
    pub fn push(&mut self, item: T) {
        assert!(!self.is_full(), "push into a sealed chunk");
        self.items.push_back(item);
    }

    /// Removes the next item according to `discipline`.
    #[inline]
    pub fn pop(&mut self, discipline: Discipline) -> Option<T> {
        match discipline {
            Discipline::Fifo => self.items.pop_front(),
            Discipline::Lifo => self.items.pop_back(),
        }
    }
}
