//! PagePool - recycles page buffers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::BufferId;

use super::PageBuffer;

/// Owner of every [`PageBuffer`] the cache hands out.
///
/// Buffers are allocated on demand and returned to a free list instead of
/// being dropped, so steady-state operation does not touch the allocator.
pub struct PagePool {
    free: Mutex<Vec<Arc<PageBuffer>>>,
    next_id: AtomicUsize,
}

impl PagePool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Return a zeroed buffer from the free list, or a new one.
    pub fn allocate_page(&self) -> Arc<PageBuffer> {
        if let Some(buffer) = self.free.lock().pop() {
            return buffer;
        }
        let id = BufferId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        Arc::new(PageBuffer::new(id))
    }

    /// Reinitialize `buffer` and put it back on the free list.
    ///
    /// # Panics
    /// Panics if the buffer still has renters.
    pub fn deallocate_page(&self, buffer: Arc<PageBuffer>) {
        assert_eq!(
            buffer.share_counter(),
            0,
            "deallocating {} with {} renters",
            buffer.id(),
            buffer.share_counter()
        );
        buffer.reset();
        self.free.lock().push(buffer);
    }

    /// Buffers waiting on the free list.
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    /// Buffers ever created by this pool.
    pub fn allocated_count(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }
}

impl Default for PagePool {
    fn default() -> Self {
        Self::new()
    }
}
