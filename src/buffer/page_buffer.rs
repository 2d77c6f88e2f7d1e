//! PageBuffer - one cached page plus its sharing metadata.
//!
//! A [`PageBuffer`] holds a [`Page`] plus metadata needed for cache
//! management:
//! - Which page is loaded (if any)
//! - Share counter: how many renters currently read the page
//! - Timestamp of the last rent, for LRU eviction

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{Mutex, RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{BufferId, PageId};
use crate::storage::page::Page;

/// A buffer owned by the [`PagePool`](super::PagePool).
///
/// Once a buffer is published in the cache its bytes are immutable: writers
/// work on private copies and publish a new buffer at commit. The write lock
/// is only taken while a buffer is private (loading, resetting).
///
/// # Thread Safety
/// All fields use interior mutability for safe concurrent access:
/// - `page`: `Arc<RwLock>` so renters can hold an owned read guard
/// - `page_id`: `Mutex` for safe updates
/// - `share_counter`: `AtomicU32` for lock-free reference counting
/// - `timestamp`: `AtomicU64` logical clock of the last rent
pub struct PageBuffer {
    id: BufferId,

    page: Arc<RwLock<Page>>,

    /// Which page is currently loaded, or None if the buffer is free.
    page_id: Mutex<Option<PageId>>,

    /// Number of active renters.
    share_counter: AtomicU32,

    timestamp: AtomicU64,
}

impl PageBuffer {
    /// Create a new empty buffer.
    pub fn new(id: BufferId) -> Self {
        Self {
            id,
            page: Arc::new(RwLock::new(Page::new())),
            page_id: Mutex::new(None),
            share_counter: AtomicU32::new(0),
            timestamp: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    // ========================================================================
    // Page access (RwLock)
    // ========================================================================

    /// Acquire read lock on the page.
    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Read lock that keeps the page alive on its own.
    #[inline]
    pub(crate) fn page_arc(&self) -> ArcRwLockReadGuard<RawRwLock, Page> {
        self.page.read_arc()
    }

    /// Acquire write lock on the page.
    ///
    /// Only valid while the buffer is not published in the cache.
    #[inline]
    pub(crate) fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    // ========================================================================
    // Page ID management (Mutex for interior mutability)
    // ========================================================================

    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.lock()
    }

    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        *self.page_id.lock() = page_id;
    }

    // ========================================================================
    // Share counter (Atomic)
    // ========================================================================

    /// Add a renter and refresh the timestamp. Returns the new share count.
    #[inline]
    pub fn rent(&self, tick: u64) -> u32 {
        self.timestamp.store(tick, Ordering::Relaxed);
        self.share_counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a renter. Returns the new share count.
    ///
    /// # Panics
    /// Panics if the share counter is already 0.
    #[inline]
    pub fn release(&self) -> u32 {
        let old = self.share_counter.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "share counter underflow");
        old - 1
    }

    #[inline]
    pub fn share_counter(&self) -> u32 {
        self.share_counter.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.share_counter() > 0
    }

    /// Logical time of the last rent.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    /// Reset the buffer to its free state.
    ///
    /// # Panics
    /// Panics if the buffer still has renters.
    pub fn reset(&self) {
        assert_eq!(
            self.share_counter(),
            0,
            "resetting {} while it is shared",
            self.id
        );
        self.page_mut().reset();
        self.set_page_id(None);
        self.timestamp.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_new() {
        let buffer = PageBuffer::new(BufferId::new(3));
        assert_eq!(buffer.id(), BufferId::new(3));
        assert_eq!(buffer.page_id(), None);
        assert!(!buffer.is_shared());
        assert!(buffer.page().is_blank());
    }

    #[test]
    fn test_rent_release() {
        let buffer = PageBuffer::new(BufferId::new(0));

        assert_eq!(buffer.rent(10), 1);
        assert_eq!(buffer.rent(11), 2);
        assert_eq!(buffer.timestamp(), 11);

        assert_eq!(buffer.release(), 1);
        assert_eq!(buffer.release(), 0);
        assert!(!buffer.is_shared());
    }

    #[test]
    #[should_panic(expected = "share counter underflow")]
    fn test_release_underflow() {
        let buffer = PageBuffer::new(BufferId::new(0));
        buffer.release();
    }

    #[test]
    #[should_panic(expected = "while it is shared")]
    fn test_reset_shared_panics() {
        let buffer = PageBuffer::new(BufferId::new(0));
        buffer.rent(1);
        buffer.reset();
    }

    #[test]
    fn test_reset_clears_state() {
        let buffer = PageBuffer::new(BufferId::new(0));
        buffer.set_page_id(Some(PageId::new(9)));
        buffer.page_mut().as_mut_slice()[100] = 0xFF;
        buffer.rent(5);
        buffer.release();

        buffer.reset();

        assert_eq!(buffer.page_id(), None);
        assert_eq!(buffer.timestamp(), 0);
        assert_eq!(buffer.page().as_slice()[100], 0);
    }

    #[test]
    fn test_arc_guard_outlives_borrow() {
        let buffer = PageBuffer::new(BufferId::new(0));
        buffer.page_mut().as_mut_slice()[0] = 0x42;

        let guard = buffer.page_arc();
        assert_eq!(guard.as_slice()[0], 0x42);
    }

    #[test]
    fn test_concurrent_rent() {
        use std::thread;

        let buffer = Arc::new(PageBuffer::new(BufferId::new(0)));
        let mut handles = vec![];

        for t in 0..10 {
            let buffer = Arc::clone(&buffer);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    buffer.rent(t * 100 + i);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.share_counter(), 1000);
    }
}
