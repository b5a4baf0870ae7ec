//! Bounded, lossy hand-off queue between pipeline stages
//!
//! Single producer, single consumer. When full, a push evicts the oldest
//! entry so latency stays bounded; the consumer waits asynchronously.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Drop-oldest queue with an async consumer side
pub struct FrameQueue<T> {
    queue: ArrayQueue<T>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
    pushed: AtomicU64,
}

impl<T> FrameQueue<T> {
    /// Create a new queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            pushed: AtomicU64::new(0),
        }
    }

    /// Push an item, evicting the oldest one if full.
    /// Returns false if an item was evicted.
    pub fn push(&self, item: T) -> bool {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        let evicted = self.queue.force_push(item).is_some();
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        !evicted
    }

    /// Pop without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the queue is closed and drained, or as soon as
    /// `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if let Some(item) = self.queue.pop() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                // A push may have raced the close flag
                return self.queue.pop();
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Mark the producer side finished. Queued items stay poppable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Items evicted to admit newer ones
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Items ever pushed
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Queue shared between the producing and consuming task
pub type SharedQueue<T> = Arc<FrameQueue<T>>;

/// Create a new shared queue
pub fn create_shared_queue<T>(capacity: usize) -> SharedQueue<T> {
    Arc::new(FrameQueue::new(capacity))
}
