//! RAII guard for shared page access.
//!
//! [`SharedPage`] is the only way to look at a cached page. It holds one
//! share on the underlying [`PageBuffer`] and gives it back when dropped,
//! on every exit path.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::RawRwLock;

use crate::common::{BufferId, PageId};
use crate::storage::page::Page;

use super::page_cache::PageCache;
use super::PageBuffer;

/// Guard for read-only access to a cached page.
///
/// Many `SharedPage`s can exist for the same page at once. While any of
/// them is alive the buffer cannot be evicted or recycled.
///
/// # Example
/// ```ignore
/// let page = cache.rent(page_id, |page| disk.read_page(page_id.0, page))?;
/// let items = page.items_count();  // Deref to &Page
/// // guard drops here, share released
/// ```
pub struct SharedPage<'a> {
    cache: &'a PageCache,
    buffer: Arc<PageBuffer>,
    page_id: PageId,
    /// Dropped before the share is released so a recycled buffer can be
    /// reset without waiting on this guard.
    lock: Option<ArcRwLockReadGuard<RawRwLock, Page>>,
}

impl<'a> SharedPage<'a> {
    /// Called by the cache after it incremented the share counter.
    pub(crate) fn new(cache: &'a PageCache, buffer: Arc<PageBuffer>, page_id: PageId) -> Self {
        let lock = Some(buffer.page_arc());
        Self {
            cache,
            buffer,
            page_id,
            lock,
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn buffer_id(&self) -> BufferId {
        self.buffer.id()
    }

    /// Current renters of the underlying buffer, this guard included.
    #[inline]
    pub fn share_counter(&self) -> u32 {
        self.buffer.share_counter()
    }
}

impl Deref for SharedPage<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        match &self.lock {
            Some(lock) => lock,
            None => unreachable!("shared page used after release"),
        }
    }
}

impl Drop for SharedPage<'_> {
    fn drop(&mut self) {
        self.lock.take();
        self.cache.release(&self.buffer, self.page_id);
    }
}
