//! Bounded cache of final replies, keyed by delivery.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::types::DeliveryId;

pub const DEFAULT_CAPACITY: usize = 256;

/// Least-recently-used map from delivery to the reply that was sent for it.
///
/// Not synchronized; the [`Coalescer`](super::Coalescer) owns it behind its
/// mutex.
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: LruCache<DeliveryId, String>,
}

impl IdempotencyCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        IdempotencyCache {
            entries: LruCache::new(capacity),
        }
    }

    /// Returns the cached reply and marks it recently used.
    pub fn get(&mut self, id: &DeliveryId) -> Option<String> {
        self.entries.get(id).cloned()
    }

    /// Returns the cached reply without changing recency.
    pub fn peek(&self, id: &DeliveryId) -> Option<String> {
        self.entries.peek(id).cloned()
    }

    /// Stores a reply, evicting the least recently used entry when full.
    pub fn insert(&mut self, id: DeliveryId, text: String) {
        self.entries.put(id, text);
    }

    pub fn contains(&self, id: &DeliveryId) -> bool {
        self.entries.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
