//! Bounded drop-oldest queue between a notification callback and its
//! decode task.
//!
//! The producer side never blocks and never fails: when the queue is full
//! the oldest item is discarded. This keeps the BLE notification path free
//! of backpressure at the cost of losing stale records.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

/// Default capacity of a device's line queue.
pub const DEFAULT_LINE_QUEUE_CAPACITY: usize = 20;

#[derive(Debug)]
struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
}

/// A cloneable handle to a bounded FIFO that drops its oldest item on overflow.
#[derive(Debug)]
pub struct DropOldestQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DropOldestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DropOldestQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify: Notify::new(),
            }),
        }
    }

    /// Push an item without blocking.
    ///
    /// Returns the evicted item when the queue was full.
    pub fn push(&self, item: T) -> Option<T> {
        let evicted = {
            let mut items = self
                .inner
                .items
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let evicted = if items.len() >= self.inner.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(item);
            evicted
        };
        self.inner.notify.notify_one();
        evicted
    }

    /// Pop the oldest item if one is available.
    pub fn try_pop(&self) -> Option<T> {
        self.inner
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    /// Wait up to `wait` for an item.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<T> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.inner.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.inner
            .items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items held.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}
