//! Capacity-bounded ring buffer
//!
//! Every log the resilience core keeps (error reports, request metrics,
//! insights, retry snapshots) is bounded and evicts oldest-first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Records that carry the wall-clock time they were created at
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// FIFO buffer that drops its oldest entry when full
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedLog<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    /// Append an item, returning the evicted one if the log was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Newest `limit` items, newest first
    pub fn latest(&self, limit: usize) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().rev().take(limit).cloned().collect()
    }

    pub fn retain<F: FnMut(&T) -> bool>(&mut self, f: F) {
        self.items.retain(f);
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }
}

impl<T: Timestamped> BoundedLog<T> {
    /// Drop every item created before `cutoff`
    pub fn prune_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.items.len();
        self.items.retain(|item| item.timestamp() >= cutoff);
        before - self.items.len()
    }
}

impl<T> Extend<T> for BoundedLog<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}
