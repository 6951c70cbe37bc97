//! Bounded FIFO for work submitted while no connection is available.

use std::collections::VecDeque;

/// FIFO with a hard capacity. A push at capacity evicts the oldest entry
/// (which is dropped, never executed) before the new entry is appended, so
/// the length never exceeds the capacity and the relative order of the
/// surviving entries is preserved.
pub struct QueryQueue<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> QueryQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one first when at capacity.
    /// Returns the evicted entry, if any.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Remove and return the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
