//! Page Cache - the shared, read-only page layer.
//!
//! The [`PageCache`] provides:
//! - One resident buffer per page id, shared by every reader
//! - Share-counted buffer lifetime through [`SharedPage`] guards
//! - LRU eviction of unshared buffers beyond the configured budget
//! - Atomic installation of new committed page versions

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::buffer::replacer::LruReplacer;
use crate::buffer::{CacheStats, PageBuffer, PagePool, SharedPage};
use crate::common::{PageId, Result};
use crate::storage::page::Page;

/// Caches committed page images in memory.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                         PageCache                           │
/// │  ┌──────────────────┐   ┌──────────────────────────────┐    │
/// │  │ pages            │   │ retired                      │    │
/// │  │ PageId → Buffer  │   │ replaced, still rented       │    │
/// │  └──────────────────┘   └──────────────────────────────┘    │
/// │  ┌──────────────────┐   ┌──────────────────────────────┐    │
/// │  │ replacer (LRU)   │   │ pool: free buffers           │    │
/// │  │ unshared pages   │   │                              │    │
/// │  └──────────────────┘   └──────────────────────────────┘    │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// The cache never writes to disk and never hands out mutable access:
/// callers copy a page to change it and [`install`](Self::install) the
/// result once it is durable.
///
/// # Thread Safety
/// - `inner`: one `Mutex` over the page table, replacer and retired list;
///   share counters change only while it is held
/// - loading a missing page runs outside the mutex
/// - `stats`: all atomic counters
pub struct PageCache {
    pool: PagePool,
    inner: Mutex<CacheInner>,
    /// Logical clock for buffer timestamps.
    clock: AtomicU64,
    max_pages: usize,
    stats: CacheStats,
}

struct CacheInner {
    pages: HashMap<PageId, Arc<PageBuffer>>,
    replacer: LruReplacer,
    /// Superseded versions that still have renters.
    retired: Vec<Arc<PageBuffer>>,
}

impl PageCache {
    /// Create a cache keeping at most `max_pages` unshared pages resident.
    ///
    /// # Panics
    /// Panics if `max_pages` is 0.
    pub fn new(max_pages: usize) -> Self {
        assert!(max_pages > 0, "max_pages must be > 0");

        Self {
            pool: PagePool::new(),
            inner: Mutex::new(CacheInner {
                pages: HashMap::new(),
                replacer: LruReplacer::new(),
                retired: Vec::new(),
            }),
            clock: AtomicU64::new(0),
            max_pages,
            stats: CacheStats::new(),
        }
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Rent `page_id`, calling `load` to fill a fresh buffer on a miss.
    ///
    /// If two callers miss on the same page at once, both load it and the
    /// first one published wins; the other buffer goes back to the pool.
    ///
    /// # Errors
    /// Whatever `load` returns; nothing is cached in that case.
    pub fn rent<F>(&self, page_id: PageId, load: F) -> Result<SharedPage<'_>>
    where
        F: FnOnce(&mut Page) -> Result<()>,
    {
        if let Some(shared) = self.rent_resident(page_id) {
            CacheStats::bump(&self.stats.cache_hits);
            return Ok(shared);
        }
        CacheStats::bump(&self.stats.cache_misses);

        let buffer = self.pool.allocate_page();
        let loaded = {
            let mut page = buffer.page_mut();
            load(&mut page)
        };
        if let Err(e) = loaded {
            self.pool.deallocate_page(buffer);
            return Err(e);
        }
        CacheStats::bump(&self.stats.pages_read);
        buffer.set_page_id(Some(page_id));

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.pages.get(&page_id).cloned() {
            existing.rent(self.tick());
            inner.replacer.remove(page_id);
            drop(inner);
            self.pool.deallocate_page(buffer);
            return Ok(SharedPage::new(self, existing, page_id));
        }

        buffer.rent(self.tick());
        inner.pages.insert(page_id, Arc::clone(&buffer));
        self.evict_over_budget(&mut inner);
        drop(inner);

        Ok(SharedPage::new(self, buffer, page_id))
    }

    /// Rent `page_id` only if it is resident.
    pub fn rent_resident(&self, page_id: PageId) -> Option<SharedPage<'_>> {
        let mut inner = self.inner.lock();
        let buffer = inner.pages.get(&page_id).cloned()?;
        buffer.rent(self.tick());
        inner.replacer.remove(page_id);
        drop(inner);
        Some(SharedPage::new(self, buffer, page_id))
    }

    /// Publish `page` as the current version of `page_id`.
    ///
    /// Renters of the previous version keep reading it; its buffer is
    /// recycled once the last of them releases it.
    pub fn install(&self, page_id: PageId, page: &Page) {
        let buffer = self.pool.allocate_page();
        buffer.page_mut().copy_from(page);
        buffer.set_page_id(Some(page_id));

        let tick = self.tick();
        let mut inner = self.inner.lock();
        if let Some(old) = inner.pages.insert(page_id, buffer) {
            inner.replacer.remove(page_id);
            if old.is_shared() {
                inner.retired.push(old);
            } else {
                self.pool.deallocate_page(old);
            }
        }
        inner.replacer.record_evictable(page_id, tick);
        self.evict_over_budget(&mut inner);
        CacheStats::bump(&self.stats.installs);
    }

    /// Called by [`SharedPage`] on drop.
    pub(crate) fn release(&self, buffer: &Arc<PageBuffer>, page_id: PageId) {
        let mut inner = self.inner.lock();
        if buffer.release() > 0 {
            return;
        }

        let is_current = inner
            .pages
            .get(&page_id)
            .is_some_and(|current| Arc::ptr_eq(current, buffer));

        if is_current {
            inner.replacer.record_evictable(page_id, buffer.timestamp());
            self.evict_over_budget(&mut inner);
        } else if let Some(pos) = inner.retired.iter().position(|b| Arc::ptr_eq(b, buffer)) {
            let old = inner.retired.swap_remove(pos);
            self.pool.deallocate_page(old);
        }
    }

    fn evict_over_budget(&self, inner: &mut CacheInner) {
        while inner.pages.len() > self.max_pages {
            let Some(victim) = inner.replacer.evict() else {
                break;
            };
            if let Some(buffer) = inner.pages.remove(&victim) {
                trace!("evicting {} from {}", victim, buffer.id());
                self.pool.deallocate_page(buffer);
                CacheStats::bump(&self.stats.evictions);
            }
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Whether `page_id` currently has a resident buffer.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().pages.contains_key(&page_id)
    }

    /// Resident page versions (current only).
    pub fn resident_count(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// Buffers with at least one renter, retired versions included.
    pub fn shared_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.pages.values().filter(|b| b.is_shared()).count() + inner.retired.len()
    }

    /// Sum of all share counters.
    pub fn total_shares(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .pages
            .values()
            .chain(inner.retired.iter())
            .map(|b| b.share_counter() as u64)
            .sum()
    }

    #[inline]
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    #[inline]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    #[inline]
    pub fn pool(&self) -> &PagePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::storage::page::PageType;

    fn loader(byte: u8) -> impl FnOnce(&mut Page) -> Result<()> {
        move |page: &mut Page| {
            page.format(PageId(0), PageType::Data, 1);
            page.as_mut_slice()[100] = byte;
            Ok(())
        }
    }

    #[test]
    fn test_rent_miss_then_hit() {
        let cache = PageCache::new(4);

        {
            let page = cache.rent(PageId(1), loader(7)).unwrap();
            assert_eq!(page.as_slice()[100], 7);
            assert_eq!(page.share_counter(), 1);
        }

        let page = cache
            .rent(PageId(1), |_| panic!("should be a hit"))
            .unwrap();
        assert_eq!(page.as_slice()[100], 7);

        let stats = cache.stats().snapshot();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[test]
    fn test_concurrent_renters_share_one_buffer() {
        let cache = PageCache::new(4);

        let a = cache.rent(PageId(1), loader(1)).unwrap();
        let b = cache.rent(PageId(1), loader(2)).unwrap();

        assert_eq!(a.buffer_id(), b.buffer_id());
        assert_eq!(a.share_counter(), 2);
        assert_eq!(cache.total_shares(), 2);

        drop(a);
        assert_eq!(b.share_counter(), 1);
        drop(b);
        assert_eq!(cache.shared_count(), 0);
    }

    #[test]
    fn test_failed_load_caches_nothing() {
        let cache = PageCache::new(4);

        let result = cache.rent(PageId(3), |_| Err(Error::PageNotFound(3)));
        assert!(matches!(result, Err(Error::PageNotFound(3))));
        assert!(!cache.contains(PageId(3)));
        assert_eq!(cache.pool().free_count(), 1);
    }

    #[test]
    fn test_eviction_prefers_least_recently_rented() {
        let cache = PageCache::new(2);

        drop(cache.rent(PageId(1), loader(1)).unwrap());
        drop(cache.rent(PageId(2), loader(2)).unwrap());
        drop(cache.rent(PageId(1), loader(1)).unwrap());

        drop(cache.rent(PageId(3), loader(3)).unwrap());

        assert!(cache.contains(PageId(1)));
        assert!(!cache.contains(PageId(2)));
        assert!(cache.contains(PageId(3)));
        assert_eq!(cache.stats().snapshot().evictions, 1);
    }

    #[test]
    fn test_shared_pages_are_never_evicted() {
        let cache = PageCache::new(1);

        let held = cache.rent(PageId(1), loader(1)).unwrap();
        let other = cache.rent(PageId(2), loader(2)).unwrap();

        // Over budget, but both are rented.
        assert_eq!(cache.resident_count(), 2);
        assert_eq!(held.as_slice()[100], 1);

        drop(other);
        // Page 2 became the only candidate.
        assert!(!cache.contains(PageId(2)));
        assert!(cache.contains(PageId(1)));
        drop(held);
    }

    #[test]
    fn test_install_keeps_old_version_for_renters() {
        let cache = PageCache::new(4);
        let old = cache.rent(PageId(5), loader(1)).unwrap();

        let mut next = Page::new();
        next.format(PageId(5), PageType::Data, 1);
        next.as_mut_slice()[100] = 2;
        cache.install(PageId(5), &next);

        assert_eq!(old.as_slice()[100], 1);
        let new = cache.rent_resident(PageId(5)).unwrap();
        assert_eq!(new.as_slice()[100], 2);
        assert_ne!(old.buffer_id(), new.buffer_id());

        let free_before = cache.pool().free_count();
        drop(old);
        assert_eq!(cache.pool().free_count(), free_before + 1);
        assert_eq!(cache.stats().snapshot().installs, 1);
    }
}
