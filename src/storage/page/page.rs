//! Page - the fundamental 4KB unit of storage.
//!
//! A [`Page`] is a raw 4KB byte array that serves as the unit of I/O
//! between disk and memory. Data and index pages are formatted as a
//! slotted arena:
//!
//! ```text
//! ┌────────────┬──────────────────────────────┬──────────┬─────────────┐
//! │ header(32) │ segments, growing upward  →  │   free   │ ← slot table│
//! └────────────┴──────────────────────────────┴──────────┴─────────────┘
//! ```
//!
//! Slot `i` lives at `PAGE_SIZE - (i + 1) * SLOT_SIZE` and stores the
//! segment's position and length (both `u16`). An empty slot has length 0.
//! The header keeps `next_free_position == PAGE_HEADER_SIZE + used_bytes +
//! fragmented_bytes` at all times.

use crate::common::config::{MAX_ITEMS_PER_PAGE, PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_SIZE};
use crate::common::PageId;

use super::page_header::{read_u16, read_u32, write_u16, write_u32, PageHeader, PageType};

/// A page of data (4KB, 4KB-aligned).
///
/// # Memory Layout
/// - Size: 4096 bytes (4KB)
/// - Alignment: 4096 bytes
///
/// # Clone Implementation
/// `Page` does NOT implement `Clone` in production code: copying 4KB should
/// be explicit, see [`Page::copy_from`] and [`Page::to_boxed`].
/// A `#[cfg(test)]` Clone is provided for tests.
///
/// # Example
/// ```
/// use quillstore::storage::page::{Page, PageType};
/// use quillstore::PageId;
///
/// let mut page = Page::new();
/// page.format(PageId::new(3), PageType::Data, 1);
///
/// let (index, segment) = page.insert(5);
/// segment.copy_from_slice(b"hello");
/// assert_eq!(page.get(index), b"hello");
/// assert_eq!(page.items_count(), 1);
/// ```
#[repr(align(4096))]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

impl Page {
    /// Create a new zeroed page.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Heap-allocated copy of this page.
    pub fn to_boxed(&self) -> Box<Page> {
        let mut page = Box::new(Page::new());
        page.copy_from(self);
        page
    }

    /// Overwrite this page with the contents of `other`.
    #[inline]
    pub fn copy_from(&mut self, other: &Page) {
        self.data.copy_from_slice(&other.data);
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// True if every byte is zero (a page that was never written).
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Zero the page and write a fresh header.
    pub fn format(&mut self, page_id: PageId, page_type: PageType, col_id: u8) {
        self.reset();
        PageHeader::new(page_id, page_type, col_id).write_to(&mut self.data);
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// Compute and store checksum in the header.
    ///
    /// Call this after all modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        let checksum = PageHeader::compute_checksum(&self.data);
        write_u32(&mut self.data, PageHeader::OFFSET_CHECKSUM, checksum);
    }

    /// Verify the page checksum is valid.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum(&self.data)
    }

    // ------------------------------------------------------------------
    // Header fields
    // ------------------------------------------------------------------

    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId(read_u32(&self.data, PageHeader::OFFSET_PAGE_ID))
    }

    /// Raw page type byte decoded; unknown values read as [`PageType::Empty`].
    #[inline]
    pub fn page_type(&self) -> PageType {
        PageType::from_u8(self.data[PageHeader::OFFSET_PAGE_TYPE]).unwrap_or_default()
    }

    #[inline]
    pub fn col_id(&self) -> u8 {
        self.data[PageHeader::OFFSET_COL_ID]
    }

    #[inline]
    pub fn items_count(&self) -> u8 {
        self.data[PageHeader::OFFSET_ITEMS_COUNT]
    }

    #[inline]
    pub fn transaction_id(&self) -> u32 {
        read_u32(&self.data, PageHeader::OFFSET_TRANSACTION_ID)
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.data[PageHeader::OFFSET_IS_CONFIRMED] != 0
    }

    /// Stamp the log fields written with each page image.
    pub fn set_transaction(&mut self, transaction_id: u32, confirmed: bool) {
        write_u32(&mut self.data, PageHeader::OFFSET_TRANSACTION_ID, transaction_id);
        self.data[PageHeader::OFFSET_IS_CONFIRMED] = confirmed as u8;
    }

    #[inline]
    fn footer_slots(&self) -> usize {
        self.data[PageHeader::OFFSET_FOOTER_SLOTS] as usize
    }

    #[inline]
    fn used_bytes(&self) -> usize {
        read_u16(&self.data, PageHeader::OFFSET_USED_BYTES) as usize
    }

    #[inline]
    fn fragmented_bytes(&self) -> usize {
        read_u16(&self.data, PageHeader::OFFSET_FRAGMENTED_BYTES) as usize
    }

    #[inline]
    fn next_free_position(&self) -> usize {
        read_u16(&self.data, PageHeader::OFFSET_NEXT_FREE_POSITION) as usize
    }

    // ------------------------------------------------------------------
    // Slotted arena
    // ------------------------------------------------------------------

    /// Bytes available for one more segment, counting the slot it needs.
    ///
    /// Includes fragmented space: an insert that does not fit contiguously
    /// defragments the page first.
    pub fn free_bytes(&self) -> usize {
        if self.items_count() as usize >= MAX_ITEMS_PER_PAGE {
            return 0;
        }
        let footer = self.footer_slots() * SLOT_SIZE;
        (PAGE_SIZE - PAGE_HEADER_SIZE - footer - SLOT_SIZE).saturating_sub(self.used_bytes())
    }

    fn slot(&self, index: usize) -> (usize, usize) {
        let at = PAGE_SIZE - (index + 1) * SLOT_SIZE;
        (
            read_u16(&self.data, at) as usize,
            read_u16(&self.data, at + 2) as usize,
        )
    }

    fn set_slot(&mut self, index: usize, position: usize, length: usize) {
        let at = PAGE_SIZE - (index + 1) * SLOT_SIZE;
        write_u16(&mut self.data, at, position as u16);
        write_u16(&mut self.data, at + 2, length as u16);
    }

    /// Whether `index` refers to a live segment.
    pub fn contains(&self, index: u8) -> bool {
        (index as usize) < self.footer_slots() && self.slot(index as usize).1 > 0
    }

    /// `(position, length)` of a live segment.
    pub fn segment_bounds(&self, index: u8) -> Option<(usize, usize)> {
        self.contains(index).then(|| self.slot(index as usize))
    }

    /// Indexes of all live segments, in slot order.
    pub fn slots(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.footer_slots())
            .filter(|&i| self.slot(i).1 > 0)
            .map(|i| i as u8)
    }

    /// Segment bytes at `index`.
    ///
    /// # Panics
    /// Panics if the slot is empty.
    pub fn get(&self, index: u8) -> &[u8] {
        let (position, length) = self.live_slot(index);
        &self.data[position..position + length]
    }

    /// Mutable segment bytes at `index`.
    ///
    /// # Panics
    /// Panics if the slot is empty.
    pub fn get_mut(&mut self, index: u8) -> &mut [u8] {
        let (position, length) = self.live_slot(index);
        &mut self.data[position..position + length]
    }

    fn live_slot(&self, index: u8) -> (usize, usize) {
        assert!(
            self.contains(index),
            "slot {} of {} is empty",
            index,
            self.page_id()
        );
        self.slot(index as usize)
    }

    /// Reserve a `length`-byte segment and return its slot index and bytes.
    ///
    /// # Panics
    /// Panics if `length` is zero or larger than [`Page::free_bytes`].
    pub fn insert(&mut self, length: usize) -> (u8, &mut [u8]) {
        assert!(length > 0, "segments cannot be empty");
        assert!(
            length <= self.free_bytes(),
            "segment of {} bytes does not fit in {} ({} free)",
            length,
            self.page_id(),
            self.free_bytes()
        );

        let footer = self.footer_slots();
        let index = (0..footer).find(|&i| self.slot(i).1 == 0).unwrap_or(footer);
        let new_footer = footer.max(index + 1);

        if self.next_free_position() + length > PAGE_SIZE - new_footer * SLOT_SIZE {
            self.defragment();
        }

        let position = self.next_free_position();
        debug_assert!(position + length <= PAGE_SIZE - new_footer * SLOT_SIZE);

        self.set_slot(index, position, length);
        self.data[PageHeader::OFFSET_FOOTER_SLOTS] = new_footer as u8;
        self.data[PageHeader::OFFSET_ITEMS_COUNT] += 1;
        let used = self.used_bytes() + length;
        write_u16(&mut self.data, PageHeader::OFFSET_USED_BYTES, used as u16);
        write_u16(
            &mut self.data,
            PageHeader::OFFSET_NEXT_FREE_POSITION,
            (position + length) as u16,
        );

        (index as u8, &mut self.data[position..position + length])
    }

    /// Release the segment at `index`.
    ///
    /// # Panics
    /// Panics if the slot is empty.
    pub fn delete(&mut self, index: u8) {
        let (position, length) = self.live_slot(index);
        self.set_slot(index as usize, 0, 0);

        let items = self.items_count() - 1;
        self.data[PageHeader::OFFSET_ITEMS_COUNT] = items;
        let used = self.used_bytes() - length;
        write_u16(&mut self.data, PageHeader::OFFSET_USED_BYTES, used as u16);

        if position + length == self.next_free_position() {
            write_u16(&mut self.data, PageHeader::OFFSET_NEXT_FREE_POSITION, position as u16);
        } else {
            let fragmented = self.fragmented_bytes() + length;
            write_u16(&mut self.data, PageHeader::OFFSET_FRAGMENTED_BYTES, fragmented as u16);
        }

        let mut footer = self.footer_slots();
        while footer > 0 && self.slot(footer - 1).1 == 0 {
            footer -= 1;
        }
        self.data[PageHeader::OFFSET_FOOTER_SLOTS] = footer as u8;

        if items == 0 {
            write_u16(&mut self.data, PageHeader::OFFSET_FRAGMENTED_BYTES, 0);
            write_u16(
                &mut self.data,
                PageHeader::OFFSET_NEXT_FREE_POSITION,
                PAGE_HEADER_SIZE as u16,
            );
        }
    }

    /// Compact live segments to the start of the body, removing fragments.
    ///
    /// Slot indexes are stable, so addresses pointing into the page survive.
    pub fn defragment(&mut self) {
        let mut live: Vec<(usize, usize, usize)> = (0..self.footer_slots())
            .map(|i| {
                let (position, length) = self.slot(i);
                (position, length, i)
            })
            .filter(|&(_, length, _)| length > 0)
            .collect();
        live.sort_unstable();

        let mut next = PAGE_HEADER_SIZE;
        for (position, length, index) in live {
            if position != next {
                self.data.copy_within(position..position + length, next);
                self.set_slot(index, next, length);
            }
            next += length;
        }

        write_u16(&mut self.data, PageHeader::OFFSET_FRAGMENTED_BYTES, 0);
        write_u16(&mut self.data, PageHeader::OFFSET_NEXT_FREE_POSITION, next as u16);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        let mut new_page = Page::new();
        new_page.data.copy_from_slice(&self.data);
        new_page
    }
}

// ============================================================================
// TESTS
// ============================================================================
