//! Address of a segment inside a page.

use std::fmt;

use super::PageId;

/// `(page id, slot index)` pair pointing at one segment of a slotted page.
///
/// The empty address is `(u32::MAX, u8::MAX)`. On disk an address always
/// takes [`PageAddress::SERIALIZED_SIZE`] bytes: page id little-endian,
/// then the index byte.
///
/// # Example
/// ```
/// use quillstore::{PageAddress, PageId};
///
/// let addr = PageAddress::new(PageId::new(7), 3);
/// let mut buf = [0u8; PageAddress::SERIALIZED_SIZE];
/// addr.write_to(&mut buf);
/// assert_eq!(PageAddress::from_bytes(&buf), addr);
/// assert!(PageAddress::EMPTY.is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageAddress {
    pub page_id: PageId,
    pub index: u8,
}

impl PageAddress {
    pub const SERIALIZED_SIZE: usize = 5;

    pub const EMPTY: PageAddress = PageAddress {
        page_id: PageId::EMPTY,
        index: u8::MAX,
    };

    #[inline]
    pub fn new(page_id: PageId, index: u8) -> Self {
        Self { page_id, index }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id.is_empty() && self.index == u8::MAX
    }

    /// # Panics
    /// Panics if `data` is shorter than [`Self::SERIALIZED_SIZE`].
    pub fn from_bytes(data: &[u8]) -> Self {
        let page_id = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        Self {
            page_id: PageId(page_id),
            index: data[4],
        }
    }

    pub fn write_to(&self, data: &mut [u8]) {
        data[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        data[4] = self.index;
    }
}

impl Default for PageAddress {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Display for PageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "(empty)")
        } else {
            write!(f, "({}:{})", self.page_id.0, self.index)
        }
    }
}
