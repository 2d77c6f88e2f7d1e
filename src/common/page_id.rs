//! Page identifier type.

use std::fmt;

/// Identifies a page in the data file.
///
/// Using `u32` allows for 4 billion pages:
/// - 4,294,967,296 pages × 4KB = 16TB maximum database size
///
/// Page `k * AM_PAGE_STEP` is always an allocation-map page; every other id
/// is a data or index page described by the map page before it.
///
/// # Example
/// ```
/// use quillstore::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(!page_id.is_empty());
/// assert_eq!(page_id.0, 42);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// "No page" marker, also used inside empty [`PageAddress`]es.
    ///
    /// [`PageAddress`]: crate::common::PageAddress
    pub const EMPTY: PageId = PageId(u32::MAX);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Page(EMPTY)")
        } else {
            write!(f, "Page({})", self.0)
        }
    }
}
