//! Allocation-map page layout.

use crate::common::config::{
    AM_EXTENTS_PER_PAGE, AM_EXTENT_ENTRY_SIZE, AM_PAGE_STEP, EXTENT_SIZE, PAGE_HEADER_SIZE,
};
use crate::common::PageId;
use crate::storage::page::{Page, PageType};

use super::free_pages::{CollectionFreePages, PageClass};

/// Where a data/index page is described in the allocation map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapLocation {
    /// Ordinal of the allocation-map page (`k` in `k * AM_PAGE_STEP`).
    pub map_index: usize,
    pub extent: usize,
    /// Page within the extent (0..8).
    pub slot: usize,
}

impl MapLocation {
    /// Locate `page_id`, or `None` if it is an allocation-map page itself.
    pub fn of(page_id: PageId) -> Option<Self> {
        let offset = page_id.0 % AM_PAGE_STEP;
        if offset == 0 {
            return None;
        }
        let within = (offset - 1) as usize;
        Some(Self {
            map_index: (page_id.0 / AM_PAGE_STEP) as usize,
            extent: within / EXTENT_SIZE,
            slot: within % EXTENT_SIZE,
        })
    }
}

/// Page id of allocation-map page number `map_index`.
#[inline]
pub fn map_page_id(map_index: usize) -> PageId {
    PageId(map_index as u32 * AM_PAGE_STEP)
}

/// An allocation-map page held in memory by the service.
///
/// # Entry Layout (4 bytes per extent, starting after the page header)
/// ```text
/// byte 0     owner col id (0 = extent unclaimed)
/// bytes 1-3  24-bit little-endian field, 3 bits per page:
///            page s of the extent at bits [3s, 3s + 3)
/// ```
pub struct AllocationMapPage {
    page: Box<Page>,
    /// Changed since last persisted.
    dirty: bool,
}

impl AllocationMapPage {
    /// A fresh map page with every extent unclaimed.
    pub fn new(map_index: usize) -> Self {
        let mut page = Box::new(Page::new());
        page.format(map_page_id(map_index), PageType::AllocationMap, 0);
        Self { page, dirty: true }
    }

    /// Wrap a map page read from disk.
    pub fn from_page(page: Box<Page>) -> Self {
        debug_assert_eq!(page.page_type(), PageType::AllocationMap);
        Self { page, dirty: false }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    #[inline]
    pub fn page(&self) -> &Page {
        &self.page
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    #[inline]
    fn entry_offset(extent: usize) -> usize {
        assert!(extent < AM_EXTENTS_PER_PAGE, "extent {} out of range", extent);
        PAGE_HEADER_SIZE + extent * AM_EXTENT_ENTRY_SIZE
    }

    fn classes_field(&self, extent: usize) -> u32 {
        let at = Self::entry_offset(extent) + 1;
        let data = self.page.as_slice();
        u32::from_le_bytes([data[at], data[at + 1], data[at + 2], 0])
    }

    pub fn owner(&self, extent: usize) -> u8 {
        self.page.as_slice()[Self::entry_offset(extent)]
    }

    pub fn class(&self, extent: usize, slot: usize) -> PageClass {
        PageClass::from_bits((self.classes_field(extent) >> (slot * 3)) as u8)
    }

    pub fn set_class(&mut self, extent: usize, slot: usize, class: PageClass) {
        let mut field = self.classes_field(extent);
        field &= !(0b111 << (slot * 3));
        field |= (class as u32) << (slot * 3);

        let at = Self::entry_offset(extent) + 1;
        self.page.as_mut_slice()[at..at + 3].copy_from_slice(&field.to_le_bytes()[..3]);
        self.dirty = true;
    }

    /// Claim an unclaimed extent for `col_id` with every page empty.
    pub fn claim(&mut self, extent: usize, col_id: u8) {
        assert!(col_id > 0, "collection id 0 is reserved");
        assert_eq!(self.owner(extent), 0, "extent {} already claimed", extent);

        let at = Self::entry_offset(extent);
        let data = self.page.as_mut_slice();
        data[at] = col_id;
        data[at + 1..at + 4].fill(0);
        self.dirty = true;
    }

    /// First unclaimed extent on this page.
    pub fn find_free_extent(&self) -> Option<usize> {
        (0..AM_EXTENTS_PER_PAGE).find(|&extent| self.owner(extent) == 0)
    }

    /// Page id of the first page of `extent`.
    pub fn first_page_id(&self, extent: usize) -> PageId {
        PageId(self.page_id().0 + 1 + (extent * EXTENT_SIZE) as u32)
    }

    /// Feed every owned page of this map into the collection buckets.
    pub fn read_free_pages(&self, collections: &mut [CollectionFreePages]) {
        for extent in 0..AM_EXTENTS_PER_PAGE {
            let owner = self.owner(extent);
            if owner == 0 {
                continue;
            }
            let first = self.first_page_id(extent);
            for slot in 0..EXTENT_SIZE {
                collections[owner as usize].insert(PageId(first.0 + slot as u32), self.class(extent, slot));
            }
        }
    }

    /// Number of claimed extents.
    pub fn claimed_extents(&self) -> usize {
        (0..AM_EXTENTS_PER_PAGE)
            .filter(|&extent| self.owner(extent) != 0)
            .count()
    }
}
