//! Bounded per-stream sample queue.
//!
//! Producer (delivery thread) and consumer (drain loop) share the queue
//! through a short-lived `parking_lot::Mutex`. When a push takes the queue
//! over capacity the oldest entries are evicted until it is back at the
//! bound; evictions are logged and counted but never fail the push.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::Stamped;

/// Timestamp-ordered FIFO with a hard size bound.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    name: String,
    max_len: usize,
    items: Mutex<VecDeque<T>>,
    evicted: AtomicU64,
}

impl<T: Stamped> BoundedQueue<T> {
    /// Create a queue holding at most `max_len` items (clamped to 1).
    pub fn new(name: impl Into<String>, max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            name: name.into(),
            max_len,
            items: Mutex::new(VecDeque::with_capacity(max_len + 1)),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Append at the tail, evicting from the head to restore the bound.
    ///
    /// Returns the number of evicted items.
    pub fn push(&self, item: T) -> usize {
        let mut evicted = 0usize;
        {
            let mut items = self.items.lock();
            items.push_back(item);
            while items.len() > self.max_len {
                if let Some(old) = items.pop_front() {
                    log::warn!(
                        "Queue '{}' full ({}), dropping oldest sample (t={}us)",
                        self.name,
                        self.max_len,
                        old.timestamp_us()
                    );
                    evicted += 1;
                }
            }
        }
        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Timestamp of the oldest queued item.
    pub fn peek_oldest_timestamp(&self) -> Option<u64> {
        self.items.lock().front().map(|item| item.timestamp_us())
    }

    pub fn pop_oldest(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Total evictions since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Run `f` with exclusive access to the underlying deque.
    ///
    /// Keep `f` short: the delivery thread blocks on this lock.
    pub fn with_locked<R>(&self, f: impl FnOnce(&mut VecDeque<T>) -> R) -> R {
        let mut items = self.items.lock();
        f(&mut *items)
    }

    /// Timestamps currently queued, oldest first.
    pub fn timestamps(&self) -> Vec<u64> {
        self.items.lock().iter().map(|i| i.timestamp_us()).collect()
    }
}
