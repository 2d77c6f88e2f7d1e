//! LRU (Least Recently Used) replacement policy.
//!
//! Only pages nobody is renting are tracked; the cache adds a page when its
//! share counter drops to zero and removes it again on the next rent.

use std::collections::{BTreeSet, HashMap};

use crate::common::PageId;

/// Orders unshared pages by the timestamp of their last rent.
pub struct LruReplacer {
    /// (timestamp, page) for every evictable page, oldest first.
    order: BTreeSet<(u64, PageId)>,

    /// Timestamp each evictable page was recorded with.
    stamps: HashMap<PageId, u64>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            order: BTreeSet::new(),
            stamps: HashMap::new(),
        }
    }

    /// Mark `page_id` evictable as of `timestamp`.
    ///
    /// Re-recording a page moves it to its new position.
    pub fn record_evictable(&mut self, page_id: PageId, timestamp: u64) {
        if let Some(old) = self.stamps.insert(page_id, timestamp) {
            self.order.remove(&(old, page_id));
        }
        self.order.insert((timestamp, page_id));
    }

    /// Select the least recently used evictable page and forget it.
    pub fn evict(&mut self) -> Option<PageId> {
        let (_, page_id) = self.order.pop_first()?;
        self.stamps.remove(&page_id);
        Some(page_id)
    }

    /// Stop tracking `page_id` (rented again, or replaced).
    pub fn remove(&mut self, page_id: PageId) {
        if let Some(timestamp) = self.stamps.remove(&page_id) {
            self.order.remove(&(timestamp, page_id));
        }
    }

    /// Number of evictable pages.
    pub fn size(&self) -> usize {
        self.stamps.len()
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}
