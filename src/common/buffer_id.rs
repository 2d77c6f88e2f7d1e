//! Buffer identifier type.

use std::fmt;

/// Identifies a page buffer owned by the [`PagePool`](crate::buffer::PagePool).
///
/// Ids are handed out once per physical allocation and survive recycling
/// through the free list, so a buffer keeps its id for its whole life.
///
/// # Example
/// ```
/// use quillstore::common::BufferId;
///
/// let id = BufferId::new(5);
/// assert_eq!(id.0, 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

impl BufferId {
    /// Create a new BufferId.
    #[inline]
    pub fn new(id: usize) -> Self {
        BufferId(id)
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({})", self.0)
    }
}
