//! Skip-list node layout inside an index page segment.

use crate::common::config::{INDEX_MAX_LEVELS, INDEX_NODE_FIXED_SIZE};
use crate::common::{PageAddress, PageId};
use crate::storage::page::{Page, PageType};

use super::IndexKey;

const P_SLOT: usize = 0;
const P_LEVELS: usize = 1;
const P_DATA_BLOCK: usize = 2;
const P_NEXT_NODE: usize = 7;
const P_LINKS: usize = INDEX_NODE_FIXED_SIZE;
/// One (prev, next) pair.
const LINK_SIZE: usize = 2 * PageAddress::SERIALIZED_SIZE;

/// A decoded index node.
///
/// # Segment Layout
/// ```text
/// Offset        Size        Field
/// ------        ----        -----
/// 0             1           slot (index number within the collection)
/// 1             1           levels
/// 2             5           data_block
/// 7             5           next_node (same document, next index)
/// 12            levels*10   per level: prev (5), next (5)
/// 12+levels*10  2+len       key
/// ```
///
/// A node is a copy: link changes are made on the page through the
/// `set_*` functions, never through this struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub address: PageAddress,
    pub slot: u8,
    pub levels: u8,
    pub data_block: PageAddress,
    pub next_node: PageAddress,
    /// One entry per level.
    pub prev: Vec<PageAddress>,
    pub next: Vec<PageAddress>,
    pub key: IndexKey,
}

#[inline]
fn link_offset(level: usize) -> usize {
    P_LINKS + level * LINK_SIZE
}

fn segment(page: &Page, index: u8) -> &[u8] {
    assert_eq!(
        page.page_type(),
        PageType::Index,
        "{} is not an index page",
        page.page_id()
    );
    page.get(index)
}

fn segment_mut(page: &mut Page, index: u8, level: usize) -> &mut [u8] {
    assert_eq!(
        page.page_type(),
        PageType::Index,
        "{} is not an index page",
        page.page_id()
    );
    let data = page.get_mut(index);
    assert!(
        level < data[P_LEVELS] as usize,
        "level {} above node height {}",
        level,
        data[P_LEVELS]
    );
    data
}

impl IndexNode {
    /// Segment length of a node with `levels` levels and `key`.
    #[inline]
    pub fn node_length(levels: u8, key: &IndexKey) -> usize {
        INDEX_NODE_FIXED_SIZE + levels as usize * LINK_SIZE + key.encoded_len()
    }

    /// Decode the node in slot `index` of `page`.
    ///
    /// # Panics
    /// Panics if `page` is not an index page or the slot is empty.
    pub fn read(page: &Page, index: u8) -> Self {
        let data = segment(page, index);
        let levels = data[P_LEVELS];

        let mut prev = Vec::with_capacity(levels as usize);
        let mut next = Vec::with_capacity(levels as usize);
        for level in 0..levels as usize {
            let at = link_offset(level);
            prev.push(PageAddress::from_bytes(&data[at..]));
            next.push(PageAddress::from_bytes(&data[at + PageAddress::SERIALIZED_SIZE..]));
        }

        Self {
            address: PageAddress::new(page.page_id(), index),
            slot: data[P_SLOT],
            levels,
            data_block: PageAddress::from_bytes(&data[P_DATA_BLOCK..]),
            next_node: PageAddress::from_bytes(&data[P_NEXT_NODE..]),
            prev,
            next,
            key: IndexKey::from_bytes(&data[link_offset(levels as usize)..]),
        }
    }

    /// Write a new unlinked node into `page` and return its address.
    ///
    /// # Panics
    /// Panics if the node does not fit or `levels` is out of range.
    pub fn create(
        page: &mut Page,
        slot: u8,
        levels: u8,
        key: &IndexKey,
        data_block: PageAddress,
    ) -> PageAddress {
        assert!(
            (1..=INDEX_MAX_LEVELS).contains(&(levels as usize)),
            "invalid node height {}",
            levels
        );
        assert_eq!(page.page_type(), PageType::Index);

        let page_id: PageId = page.page_id();
        let (index, data) = page.insert(Self::node_length(levels, key));
        data[P_SLOT] = slot;
        data[P_LEVELS] = levels;
        data_block.write_to(&mut data[P_DATA_BLOCK..]);
        PageAddress::EMPTY.write_to(&mut data[P_NEXT_NODE..]);
        for level in 0..levels as usize {
            let at = link_offset(level);
            PageAddress::EMPTY.write_to(&mut data[at..]);
            PageAddress::EMPTY.write_to(&mut data[at + PageAddress::SERIALIZED_SIZE..]);
        }
        key.write_to(&mut data[link_offset(levels as usize)..]);

        PageAddress::new(page_id, index)
    }

    /// Next link of the node in slot `index` at `level`.
    pub fn next_at(page: &Page, index: u8, level: usize) -> PageAddress {
        let data = segment(page, index);
        assert!(level < data[P_LEVELS] as usize, "level {} above node height", level);
        PageAddress::from_bytes(&data[link_offset(level) + PageAddress::SERIALIZED_SIZE..])
    }

    pub fn set_prev(page: &mut Page, index: u8, level: usize, address: PageAddress) {
        let data = segment_mut(page, index, level);
        address.write_to(&mut data[link_offset(level)..]);
    }

    pub fn set_next(page: &mut Page, index: u8, level: usize, address: PageAddress) {
        let data = segment_mut(page, index, level);
        address.write_to(&mut data[link_offset(level) + PageAddress::SERIALIZED_SIZE..]);
    }

    pub fn set_next_node(page: &mut Page, index: u8, address: PageAddress) {
        let data = segment_mut(page, index, 0);
        address.write_to(&mut data[P_NEXT_NODE..]);
    }
}
