//! An unbounded multi-producer single-consumer queue.
//!
//! Producers link nodes with a single `swap` on the tail; the consumer walks
//! from a dummy head. The consumer side takes `&mut self`, so one receiver is
//! enforced by the type system rather than by convention.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

use crate::concurrency::CachePadded;

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: Option<T>,
}

impl<T> Node<T> {
    fn alloc(value: Option<T>) -> *mut Node<T> {
        Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value,
        }))
    }
}

struct ChannelState<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
    closed: AtomicBool,
}

// SAFETY: nodes are only reached through the atomics; values move between
// threads, so `T: Send` is required.
unsafe impl<T: Send> Send for ChannelState<T> {}
unsafe impl<T: Send> Sync for ChannelState<T> {}

/// Error returned by [`Sender::send`] once the receiver is gone.
#[derive(Debug, PartialEq, Eq)]
pub struct SendError<T>(pub T);

/// The sending half. Cheap to clone.
pub struct Sender<T> {
    state: Arc<ChannelState<T>>,
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

/// The receiving half.
pub struct Receiver<T> {
    state: Arc<ChannelState<T>>,
}

/// Creates a new unbounded channel.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let dummy = Node::alloc(None);
    let state = Arc::new(ChannelState {
        head: CachePadded::new(AtomicPtr::new(dummy)),
        tail: CachePadded::new(AtomicPtr::new(dummy)),
        closed: AtomicBool::new(false),
    });
    (
        Sender {
            state: Arc::clone(&state),
        },
        Receiver { state },
    )
}

impl<T> Sender<T> {
    /// Enqueues `value`.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(SendError(value));
        }
        let node = Node::alloc(Some(value));
        let prev = self.state.tail.swap(node, Ordering::AcqRel);
        // SAFETY: `prev` stays allocated until the consumer moves past it, which
        // requires observing the `next` link stored here.
        unsafe {
            (*prev).next.store(node, Ordering::Release);
        }
        Ok(())
    }
}

impl<T> Receiver<T> {
    /// Dequeues the oldest value, if one is fully linked.
    ///
    /// A producer that has swapped the tail but not yet linked its node is not
    /// visible yet; a later call will see it.
    pub fn try_recv(&mut self) -> Option<T> {
        let head = self.state.head.load(Ordering::Relaxed);
        // SAFETY: only the receiver advances or frees `head`.
        unsafe {
            let next = (*head).next.load(Ordering::Acquire);
            if next.is_null() {
                return None;
            }
            let value = (*next).value.take();
            self.state.head.store(next, Ordering::Relaxed);
            drop(Box::from_raw(head));
            value
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::Release);
    }
}

impl<T> Drop for ChannelState<T> {
    fn drop(&mut self) {
        let mut cur = self.head.load(Ordering::Relaxed);
        while !cur.is_null() {
            // SAFETY: the last handle is gone; every node is owned here.
            unsafe {
                let next = (*cur).next.load(Ordering::Relaxed);
                drop(Box::from_raw(cur));
                cur = next;
            }
        }
    }
}
