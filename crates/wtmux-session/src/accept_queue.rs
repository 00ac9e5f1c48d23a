//! FIFO hand-off of incoming streams to accepting callers
//!
//! Producers never block. The wake-up signal coalesces: any number of adds
//! between two waits leave a single pending notification, and a consumer
//! that wakes drains the queue with [`AcceptQueue::next`] until it is empty.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Unbounded queue of items waiting to be accepted
#[derive(Debug)]
pub struct AcceptQueue<T> {
    items: Mutex<VecDeque<T>>,
    signal: Notify,
}

impl<T> AcceptQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            signal: Notify::new(),
        }
    }

    /// Append an item and raise the signal
    ///
    /// Returns the queue depth after the push.
    pub fn add(&self, item: T) -> usize {
        let depth = {
            let mut items = self.items.lock();
            items.push_back(item);
            items.len()
        };
        self.signal.notify_one();
        depth
    }

    /// Pop the oldest item, if any
    pub fn next(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Future that resolves once the signal has been raised
    ///
    /// A raise with nobody waiting is remembered, so a consumer that checks
    /// [`next`](Self::next) and then waits never misses an add in between.
    pub fn notified(&self) -> Notified<'_> {
        self.signal.notified()
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for AcceptQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
