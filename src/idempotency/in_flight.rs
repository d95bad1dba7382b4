//! Deliveries currently being processed.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::types::DeliveryId;

pub const DEFAULT_CAPACITY: usize = 256;

/// Counted reservations per delivery.
///
/// A delivery can be held more than once: a duplicate that gave up waiting
/// processes alongside the original. The mark disappears when the last
/// holder releases. When more than `capacity` deliveries are in flight the
/// oldest mark is forgotten, which only means a later duplicate of it
/// processes without waiting.
#[derive(Debug)]
pub struct InFlightTracker {
    holders: LruCache<DeliveryId, u32>,
}

impl InFlightTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        InFlightTracker {
            holders: LruCache::new(capacity),
        }
    }

    /// Adds a holder and returns the new holder count.
    pub fn acquire(&mut self, id: &DeliveryId) -> u32 {
        if let Some(count) = self.holders.get_mut(id) {
            *count += 1;
            return *count;
        }
        self.holders.put(id.clone(), 1);
        1
    }

    /// Removes a holder. Returns true when that was the last one.
    pub fn release(&mut self, id: &DeliveryId) -> bool {
        match self.holders.peek_mut(id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.holders.pop(id);
                true
            }
            None => false,
        }
    }

    pub fn is_in_flight(&self, id: &DeliveryId) -> bool {
        self.holders.contains(id)
    }

    pub fn holders(&self, id: &DeliveryId) -> u32 {
        self.holders.peek(id).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
