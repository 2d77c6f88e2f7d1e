//! Allocation Map Service - per-collection free-space tracking.

use log::{debug, info};
use parking_lot::Mutex;

use crate::common::config::{
    AM_DATA_PAGE_SPACE_LARGE, AM_DATA_PAGE_SPACE_MEDIUM, AM_DATA_PAGE_SPACE_SMALL, EXTENT_SIZE,
};
use crate::common::{PageId, Result};
use crate::storage::page::{Page, PageType};
use crate::storage::{DiskStream, PageState};

use super::free_pages::{Bucket, CollectionFreePages, FreePagesSummary, PageClass};
use super::map_page::{map_page_id, AllocationMapPage, MapLocation};

/// A page whose free-space class must be written to the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapUpdate {
    pub page_id: PageId,
    pub col_id: u8,
    pub class: PageClass,
}

impl MapUpdate {
    /// Describe `page` as it is now.
    pub fn of(page: &Page) -> Self {
        Self {
            page_id: page.page_id(),
            col_id: page.col_id(),
            class: PageClass::of(page),
        }
    }
}

/// Tracks which pages belong to which collection and how full they are.
///
/// The durable form is the set of allocation-map pages (one every
/// `AM_PAGE_STEP` page ids), held here in memory and written back by
/// [`persist`](Self::persist). The bucket queues mirror it for O(1)
/// allocation.
///
/// Pages handed out by [`get_free_page_id`](Self::get_free_page_id) sit in no
/// bucket until the caller reports them back through
/// [`update_map`](Self::update_map) or [`restore_pages`](Self::restore_pages).
///
/// Every operation runs inside one mutex, so extent creation and map updates
/// never interleave.
pub struct AllocationMapService {
    state: Mutex<MapState>,
}

struct MapState {
    pages: Vec<AllocationMapPage>,
    /// Indexed by col id; entry 0 is unused.
    collections: Vec<CollectionFreePages>,
}

impl AllocationMapService {
    /// An empty map with a single (unsaved) map page.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MapState {
                pages: vec![AllocationMapPage::new(0)],
                collections: (0..=u8::MAX as usize)
                    .map(|_| CollectionFreePages::default())
                    .collect(),
            }),
        }
    }

    /// Load every allocation-map page from the data file.
    ///
    /// Map pages missing on disk (never checkpointed) start empty and are
    /// filled in by [`update_map`](Self::update_map) during recovery.
    pub fn initialize(&self, disk: &mut DiskStream) -> Result<()> {
        let mut pages = Vec::new();
        let mut map_index = 0;

        while map_page_id(map_index).0 < disk.page_count() || map_index == 0 {
            let page_id = map_page_id(map_index);
            let map = if page_id.0 < disk.page_count() {
                let mut page = Box::new(Page::new());
                match disk.load_page(page_id.0, &mut page)? {
                    PageState::Valid if page.page_type() == PageType::AllocationMap => {
                        AllocationMapPage::from_page(page)
                    }
                    PageState::Torn => {
                        return Err(crate::common::Error::corruption(format!(
                            "allocation map page {} failed its checksum",
                            page_id
                        )))
                    }
                    _ => AllocationMapPage::new(map_index),
                }
            } else {
                AllocationMapPage::new(map_index)
            };
            pages.push(map);
            map_index += 1;
        }

        let mut state = self.state.lock();
        state.collections = (0..=u8::MAX as usize)
            .map(|_| CollectionFreePages::default())
            .collect();
        let MapState { pages: slot, collections } = &mut *state;
        for map in &pages {
            map.read_free_pages(collections);
        }
        *slot = pages;

        info!(
            "allocation map loaded: {} map page(s), {} extent(s) claimed",
            state.pages.len(),
            state.pages.iter().map(|p| p.claimed_extents()).sum::<usize>()
        );
        Ok(())
    }

    /// Page id with room for `length` bytes in collection `col_id`, and
    /// whether it is a brand-new empty page the caller must format.
    ///
    /// Data requests are served from the smallest bucket class that is
    /// guaranteed to fit `length`, then larger ones; index requests only
    /// from the index bucket. Otherwise an empty page is used, creating a
    /// new extent if the collection has none left.
    ///
    /// # Panics
    /// Panics for `col_id == 0` or page types other than Data and Index.
    pub fn get_free_page_id(&self, col_id: u8, page_type: PageType, length: usize) -> (PageId, bool) {
        assert!(col_id > 0, "collection id 0 is reserved");

        let mut state = self.state.lock();
        let free = &mut state.collections[col_id as usize];

        let candidates: &[Bucket] = match page_type {
            PageType::Data if length < AM_DATA_PAGE_SPACE_SMALL => {
                &[Bucket::DataSmall, Bucket::DataMedium, Bucket::DataLarge]
            }
            PageType::Data if length < AM_DATA_PAGE_SPACE_MEDIUM => {
                &[Bucket::DataMedium, Bucket::DataLarge]
            }
            PageType::Data if length < AM_DATA_PAGE_SPACE_LARGE => &[Bucket::DataLarge],
            PageType::Data => &[],
            PageType::Index => &[Bucket::Index],
            other => panic!("cannot allocate a {:?} page", other),
        };

        for &bucket in candidates {
            if let Some(page_id) = free.dequeue(bucket) {
                return (page_id, false);
            }
        }

        if let Some(page_id) = free.dequeue(Bucket::Empty) {
            return (page_id, true);
        }

        Self::create_extend(&mut state, col_id);
        match state.collections[col_id as usize].dequeue(Bucket::Empty) {
            Some(page_id) => (page_id, true),
            None => unreachable!("a new extent always has empty pages"),
        }
    }

    /// Claim a new extent for `col_id` and queue its 8 pages as empty.
    ///
    /// Returns the extent's page ids, which are always contiguous.
    pub fn create_new_extend(&self, col_id: u8) -> [PageId; EXTENT_SIZE] {
        assert!(col_id > 0, "collection id 0 is reserved");
        let mut state = self.state.lock();
        Self::create_extend(&mut state, col_id)
    }

    fn create_extend(state: &mut MapState, col_id: u8) -> [PageId; EXTENT_SIZE] {
        let found = state
            .pages
            .iter()
            .enumerate()
            .find_map(|(i, map)| map.find_free_extent().map(|extent| (i, extent)));

        let (map_index, extent) = match found {
            Some(found) => found,
            None => {
                let map_index = state.pages.len();
                state.pages.push(AllocationMapPage::new(map_index));
                info!(
                    "allocation map page {} created at {}",
                    map_index,
                    map_page_id(map_index)
                );
                (map_index, 0)
            }
        };

        let map = &mut state.pages[map_index];
        map.claim(extent, col_id);
        let first = map.first_page_id(extent);

        let ids: [PageId; EXTENT_SIZE] = std::array::from_fn(|i| PageId(first.0 + i as u32));
        let free = &mut state.collections[col_id as usize];
        for page_id in ids {
            free.insert(page_id, PageClass::Empty);
        }

        debug!(
            "collection {} claimed extent {}..={}",
            col_id,
            first.0,
            first.0 + EXTENT_SIZE as u32 - 1
        );
        ids
    }

    /// Record each page's class in the bitmap and move it to the matching
    /// bucket.
    ///
    /// An update for an unclaimed extent claims it for the page's
    /// collection (recovery of extents created after the last checkpoint).
    pub fn update_map(&self, updates: &[MapUpdate]) {
        let mut state = self.state.lock();
        for update in updates {
            Self::apply(&mut state, update);
        }
    }

    fn apply(state: &mut MapState, update: &MapUpdate) {
        let location = match MapLocation::of(update.page_id) {
            Some(location) => location,
            None => panic!("{} is an allocation-map page", update.page_id),
        };
        assert!(update.col_id > 0, "{} has no collection", update.page_id);

        while state.pages.len() <= location.map_index {
            let map_index = state.pages.len();
            state.pages.push(AllocationMapPage::new(map_index));
        }

        let MapState { pages, collections } = state;
        let map = &mut pages[location.map_index];
        match map.owner(location.extent) {
            0 => {
                map.claim(location.extent, update.col_id);
                let first = map.first_page_id(location.extent);
                for slot in 0..EXTENT_SIZE {
                    collections[update.col_id as usize]
                        .insert(PageId(first.0 + slot as u32), PageClass::Empty);
                }
            }
            owner => assert_eq!(
                owner, update.col_id,
                "{} belongs to collection {}",
                update.page_id, owner
            ),
        }

        map.set_class(location.extent, location.slot, update.class);
        collections[update.col_id as usize].insert(update.page_id, update.class);
    }

    /// Return checked-out pages to the bucket of their recorded class.
    pub fn restore_pages(&self, pages: &[PageId]) {
        let mut state = self.state.lock();
        let MapState { pages: maps, collections } = &mut *state;
        for &page_id in pages {
            let Some(location) = MapLocation::of(page_id) else {
                continue;
            };
            let Some(map) = maps.get(location.map_index) else {
                continue;
            };
            let owner = map.owner(location.extent);
            if owner != 0 {
                collections[owner as usize].insert(page_id, map.class(location.extent, location.slot));
            }
        }
    }

    /// Recorded class and owner of `page_id`.
    pub fn class_of(&self, page_id: PageId) -> Option<(u8, PageClass)> {
        let location = MapLocation::of(page_id)?;
        let state = self.state.lock();
        let map = state.pages.get(location.map_index)?;
        match map.owner(location.extent) {
            0 => None,
            owner => Some((owner, map.class(location.extent, location.slot))),
        }
    }

    /// Bucket sizes of one collection.
    pub fn free_pages(&self, col_id: u8) -> FreePagesSummary {
        self.state.lock().collections[col_id as usize].summary()
    }

    /// Copy of an allocation-map page, as currently held in memory.
    pub fn map_page(&self, page_id: PageId) -> Option<Box<Page>> {
        if MapLocation::of(page_id).is_some() {
            return None;
        }
        let map_index = (page_id.0 / crate::common::config::AM_PAGE_STEP) as usize;
        self.state.lock().pages.get(map_index).map(|map| map.page().to_boxed())
    }

    pub fn map_page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Highest page id any claimed extent reaches.
    pub fn last_page_id(&self) -> PageId {
        let state = self.state.lock();
        let mut last = PageId(0);
        for map in &state.pages {
            last = last.max(map.page_id());
            if let Some(extent) = (0..crate::common::config::AM_EXTENTS_PER_PAGE)
                .rev()
                .find(|&e| map.owner(e) != 0)
            {
                last = last.max(PageId(map.first_page_id(extent).0 + EXTENT_SIZE as u32 - 1));
            }
        }
        last
    }

    /// Write dirty map pages to the data file. Returns how many were written.
    pub fn persist(&self, disk: &mut DiskStream) -> Result<usize> {
        let mut state = self.state.lock();
        let mut written = 0;
        for map in state.pages.iter_mut().filter(|map| map.is_dirty()) {
            disk.write_page(map.page_id().0, map.page())?;
            map.mark_clean();
            written += 1;
        }
        if written > 0 {
            debug!("persisted {} allocation map page(s)", written);
        }
        Ok(written)
    }
}

impl Default for AllocationMapService {
    fn default() -> Self {
        Self::new()
    }
}
