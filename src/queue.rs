//! Bounded concurrent queue shared between pipeline stages.
//!
//! Each stage owns one end of a queue: the producer pushes without
//! blocking and the consumer either polls or waits for a bounded time,
//! so cancellation is always observed within one poll interval.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

/// Error returned by [`BoundedQueue::try_push`], handing the rejected element back.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueFull<T>(pub T);

/// A fixed-capacity FIFO queue safe for concurrent push and pop.
///
/// Cloning a queue yields another handle to the same underlying buffer.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` elements.
    ///
    /// A capacity of 0 is bumped to 1; a zero-capacity channel would
    /// turn every non-blocking push into a rejection.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Push an element without blocking.
    ///
    /// # Errors
    ///
    /// Returns the element back inside [`QueueFull`] when the queue is at capacity.
    pub fn try_push(&self, value: T) -> Result<(), QueueFull<T>> {
        match self.tx.try_send(value) {
            Ok(()) => Ok(()),
            // Both ends live in `self`, so the channel can never be disconnected.
            Err(TrySendError::Full(value) | TrySendError::Disconnected(value)) => {
                Err(QueueFull(value))
            }
        }
    }

    /// Pop the oldest element, returning `None` immediately when empty.
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Pop the oldest element, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Some(value),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Returns the number of queued elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Returns the fixed capacity.
    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}
