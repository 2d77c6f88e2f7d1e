//! Free-space classes and the per-collection bucket queues.

use std::collections::{HashMap, VecDeque};

use crate::common::config::{
    AM_DATA_PAGE_SPACE_LARGE, AM_DATA_PAGE_SPACE_MEDIUM, AM_DATA_PAGE_SPACE_SMALL,
    INDEX_NODE_MAX_LENGTH,
};
use crate::common::PageId;
use crate::storage::page::{Page, PageType};

/// 3-bit free-space class stored for every page in the allocation map.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageClass {
    Empty = 0,
    DataLarge = 1,
    DataMedium = 2,
    DataSmall = 3,
    DataFull = 4,
    IndexFree = 5,
    IndexFull = 6,
    Reserved = 7,
}

impl PageClass {
    /// Decode the low three bits of `bits`.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => PageClass::Empty,
            1 => PageClass::DataLarge,
            2 => PageClass::DataMedium,
            3 => PageClass::DataSmall,
            4 => PageClass::DataFull,
            5 => PageClass::IndexFree,
            6 => PageClass::IndexFull,
            _ => PageClass::Reserved,
        }
    }

    /// Class implied by a page's current content.
    ///
    /// A page with no items is empty regardless of its type, so it can come
    /// back as either a data or an index page.
    pub fn of(page: &Page) -> Self {
        if page.items_count() == 0 {
            return PageClass::Empty;
        }
        let free = page.free_bytes();
        match page.page_type() {
            PageType::Data if free >= AM_DATA_PAGE_SPACE_LARGE => PageClass::DataLarge,
            PageType::Data if free >= AM_DATA_PAGE_SPACE_MEDIUM => PageClass::DataMedium,
            PageType::Data if free >= AM_DATA_PAGE_SPACE_SMALL => PageClass::DataSmall,
            PageType::Data => PageClass::DataFull,
            PageType::Index if free >= INDEX_NODE_MAX_LENGTH => PageClass::IndexFree,
            PageType::Index => PageClass::IndexFull,
            _ => PageClass::Reserved,
        }
    }

    /// Bucket holding pages of this class, if any.
    fn bucket(self) -> Option<Bucket> {
        match self {
            PageClass::Empty => Some(Bucket::Empty),
            PageClass::DataLarge => Some(Bucket::DataLarge),
            PageClass::DataMedium => Some(Bucket::DataMedium),
            PageClass::DataSmall => Some(Bucket::DataSmall),
            PageClass::IndexFree => Some(Bucket::Index),
            PageClass::DataFull | PageClass::IndexFull | PageClass::Reserved => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Bucket {
    Empty = 0,
    DataSmall = 1,
    DataMedium = 2,
    DataLarge = 3,
    Index = 4,
}

const BUCKETS: usize = 5;

/// Bucket sizes for one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreePagesSummary {
    pub empty: usize,
    pub data_small: usize,
    pub data_medium: usize,
    pub data_large: usize,
    pub index: usize,
}

/// In-memory mirror of one collection's free pages.
///
/// A page is in at most one bucket. Moving a page only updates `member`;
/// stale queue entries are skipped when dequeued.
#[derive(Debug, Default)]
pub(crate) struct CollectionFreePages {
    queues: [VecDeque<PageId>; BUCKETS],
    member: HashMap<PageId, Bucket>,
    counts: [usize; BUCKETS],
}

impl CollectionFreePages {
    /// Place `page_id` in the bucket for `class`, leaving any other bucket.
    pub fn insert(&mut self, page_id: PageId, class: PageClass) {
        self.remove(page_id);
        if let Some(bucket) = class.bucket() {
            self.member.insert(page_id, bucket);
            self.queues[bucket as usize].push_back(page_id);
            self.counts[bucket as usize] += 1;
        }
    }

    pub fn remove(&mut self, page_id: PageId) {
        if let Some(bucket) = self.member.remove(&page_id) {
            self.counts[bucket as usize] -= 1;
        }
    }

    pub fn dequeue(&mut self, bucket: Bucket) -> Option<PageId> {
        let queue = &mut self.queues[bucket as usize];
        while let Some(page_id) = queue.pop_front() {
            if self.member.get(&page_id) == Some(&bucket) {
                self.member.remove(&page_id);
                self.counts[bucket as usize] -= 1;
                return Some(page_id);
            }
        }
        None
    }

    #[cfg(test)]
    pub fn bucket_of(&self, page_id: PageId) -> Option<Bucket> {
        self.member.get(&page_id).copied()
    }

    pub fn summary(&self) -> FreePagesSummary {
        FreePagesSummary {
            empty: self.counts[Bucket::Empty as usize],
            data_small: self.counts[Bucket::DataSmall as usize],
            data_medium: self.counts[Bucket::DataMedium as usize],
            data_large: self.counts[Bucket::DataLarge as usize],
            index: self.counts[Bucket::Index as usize],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_of_data_page() {
        let mut page = Page::new();
        page.format(PageId(1), PageType::Data, 1);
        assert_eq!(PageClass::of(&page), PageClass::Empty);

        page.insert(100);
        assert_eq!(PageClass::of(&page), PageClass::DataLarge);

        page.insert(1500);
        assert_eq!(PageClass::of(&page), PageClass::DataMedium);

        page.insert(1500);
        assert_eq!(PageClass::of(&page), PageClass::DataSmall);

        page.insert(page.free_bytes());
        assert_eq!(PageClass::of(&page), PageClass::DataFull);
    }

    #[test]
    fn test_class_of_index_page() {
        let mut page = Page::new();
        page.format(PageId(1), PageType::Index, 1);
        page.insert(100);
        assert_eq!(PageClass::of(&page), PageClass::IndexFree);

        page.insert(page.free_bytes() - 100);
        assert_eq!(PageClass::of(&page), PageClass::IndexFull);
    }

    #[test]
    fn test_insert_moves_between_buckets() {
        let mut free = CollectionFreePages::default();
        free.insert(PageId(1), PageClass::Empty);
        free.insert(PageId(1), PageClass::DataSmall);

        assert_eq!(free.bucket_of(PageId(1)), Some(Bucket::DataSmall));
        assert_eq!(free.summary().empty, 0);
        assert_eq!(free.summary().data_small, 1);
        assert_eq!(free.dequeue(Bucket::Empty), None);
        assert_eq!(free.dequeue(Bucket::DataSmall), Some(PageId(1)));
        assert_eq!(free.dequeue(Bucket::DataSmall), None);
    }

    #[test]
    fn test_full_pages_leave_all_buckets() {
        let mut free = CollectionFreePages::default();
        free.insert(PageId(4), PageClass::IndexFree);
        free.insert(PageId(4), PageClass::IndexFull);

        assert_eq!(free.bucket_of(PageId(4)), None);
        assert_eq!(free.summary(), FreePagesSummary::default());
    }

    #[test]
    fn test_dequeue_is_fifo() {
        let mut free = CollectionFreePages::default();
        for id in [5, 3, 9] {
            free.insert(PageId(id), PageClass::Empty);
        }
        assert_eq!(free.dequeue(Bucket::Empty), Some(PageId(5)));
        assert_eq!(free.dequeue(Bucket::Empty), Some(PageId(3)));
        assert_eq!(free.dequeue(Bucket::Empty), Some(PageId(9)));
    }
}
