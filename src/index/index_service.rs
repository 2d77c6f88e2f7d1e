//! Index Service - ordered on-disk skip lists.

use std::cmp::Ordering;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::config::{INDEX_MAX_KEY_LENGTH, INDEX_MAX_LEVELS};
use crate::common::{Error, PageAddress, Result};
use crate::concurrency::Transaction;
use crate::storage::page::PageType;

use super::{BinaryCollation, Collation, IndexKey, IndexNode};

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

impl Order {
    /// Comparison result meaning "past the target" in this direction.
    #[inline]
    fn past(self) -> Ordering {
        match self {
            Order::Ascending => Ordering::Greater,
            Order::Descending => Ordering::Less,
        }
    }

    #[inline]
    fn step(self, node: &IndexNode, level: usize) -> PageAddress {
        match self {
            Order::Ascending => node.next[level],
            Order::Descending => node.prev[level],
        }
    }
}

/// Where an index lives. The collection catalog stores this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexInfo {
    pub col_id: u8,
    /// Index number within the collection, written into every node.
    pub slot: u8,
    pub unique: bool,
    pub head: PageAddress,
    pub tail: PageAddress,
}

/// Skip-list operations over index pages.
///
/// All page access goes through a [`Transaction`], so every link change
/// lands on the transaction's private copy of the page and is published
/// (and reported to the allocation map) at commit.
///
/// The sentinels carry every level but are linked to each other on level 0
/// only. A higher level becomes linked the first time a node that tall is
/// inserted; until then the walk simply drops through it.
pub struct IndexService {
    collation: Arc<dyn Collation>,
    rng: Mutex<StdRng>,
}

impl IndexService {
    pub fn new(collation: Arc<dyn Collation>) -> Self {
        Self {
            collation,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// A service whose node heights are reproducible.
    pub fn with_seed(collation: Arc<dyn Collation>, seed: u64) -> Self {
        Self {
            collation,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn collation(&self) -> &dyn Collation {
        self.collation.as_ref()
    }

    /// Random node height: 1, plus one for every consecutive 1 bit.
    pub fn flip(&self) -> u8 {
        let mut bits: u32 = self.rng.lock().gen();
        let mut levels = 1;
        while bits & 1 == 1 {
            levels += 1;
            if levels == INDEX_MAX_LEVELS {
                break;
            }
            bits >>= 1;
        }
        levels as u8
    }

    /// Create the head and tail sentinels of a new index on one index page.
    pub fn create_head_tail_nodes(
        &self,
        tx: &mut Transaction<'_>,
        col_id: u8,
        slot: u8,
        unique: bool,
    ) -> Result<IndexInfo> {
        let levels = INDEX_MAX_LEVELS as u8;
        let length = IndexNode::node_length(levels, &IndexKey::MinValue)
            + IndexNode::node_length(levels, &IndexKey::MaxValue);

        let page_id = tx.get_free_page(col_id, PageType::Index, length)?;
        let page = tx.page_mut(page_id)?;

        let head = IndexNode::create(page, slot, levels, &IndexKey::MinValue, PageAddress::EMPTY);
        let tail = IndexNode::create(page, slot, levels, &IndexKey::MaxValue, PageAddress::EMPTY);
        IndexNode::set_next(page, head.index, 0, tail);
        IndexNode::set_prev(page, tail.index, 0, head);

        Ok(IndexInfo {
            col_id,
            slot,
            unique,
            head,
            tail,
        })
    }

    /// Read the node at `address`.
    ///
    /// # Panics
    /// Panics if the page is not an index page.
    pub fn get_node(&self, tx: &Transaction<'_>, address: PageAddress) -> Result<IndexNode> {
        tx.read_page(address.page_id, |page| IndexNode::read(page, address.index))
    }

    /// Insert `key` pointing at `data_block`.
    ///
    /// `last` is the node of the same document in the previous index; its
    /// `next_node` is pointed at the new node.
    ///
    /// # Errors
    /// - `InvalidIndexKey` for `MinValue`/`MaxValue`
    /// - `IndexKeyTooLong` above [`INDEX_MAX_KEY_LENGTH`]
    /// - `DuplicateKey` if the index is unique and holds an equal key; no
    ///   page is changed in that case
    pub fn add_node(
        &self,
        tx: &mut Transaction<'_>,
        index: &IndexInfo,
        key: IndexKey,
        data_block: PageAddress,
        last: Option<PageAddress>,
    ) -> Result<IndexNode> {
        if key.is_sentinel() {
            return Err(Error::InvalidIndexKey("MinValue and MaxValue are reserved"));
        }
        if key.len() > INDEX_MAX_KEY_LENGTH {
            return Err(Error::IndexKeyTooLong {
                len: key.len(),
                max: INDEX_MAX_KEY_LENGTH,
            });
        }

        let levels = self.flip();

        // Left neighbour on every level below the new node's height.
        let mut left_of = [PageAddress::EMPTY; INDEX_MAX_LEVELS];
        let mut left = self.get_node(tx, index.head)?;
        for level in (0..INDEX_MAX_LEVELS).rev() {
            while !left.next[level].is_empty() {
                let right = self.get_node(tx, left.next[level])?;
                match right.key.compare(&key, self.collation()) {
                    Ordering::Equal if index.unique => {
                        return Err(Error::DuplicateKey { slot: index.slot });
                    }
                    Ordering::Greater => break,
                    _ => left = right,
                }
            }
            if level < levels as usize {
                left_of[level] = left.address;
            }
        }

        let length = IndexNode::node_length(levels, &key);
        let page_id = tx.get_free_page(index.col_id, PageType::Index, length)?;
        let address = IndexNode::create(tx.page_mut(page_id)?, index.slot, levels, &key, data_block);

        for (level, &prev) in left_of.iter().enumerate().take(levels as usize) {
            let mut next = tx.read_page(prev.page_id, |page| IndexNode::next_at(page, prev.index, level))?;
            if next.is_empty() {
                next = index.tail;
            }

            let page = tx.page_mut(address.page_id)?;
            IndexNode::set_prev(page, address.index, level, prev);
            IndexNode::set_next(page, address.index, level, next);

            IndexNode::set_next(tx.page_mut(prev.page_id)?, prev.index, level, address);
            IndexNode::set_prev(tx.page_mut(next.page_id)?, next.index, level, address);
        }

        if let Some(last) = last {
            IndexNode::set_next_node(tx.page_mut(last.page_id)?, last.index, address);
        }

        trace!("index {} added {:?} at {} ({} levels)", index.slot, key, address, levels);
        self.get_node(tx, address)
    }

    /// Find `key`, walking in `order`.
    ///
    /// With `sibling`, a miss returns the first node past `key` in scan
    /// direction (the first key `>=` target ascending, `<=` descending),
    /// or `None` if that is a sentinel.
    pub fn find(
        &self,
        tx: &Transaction<'_>,
        index: &IndexInfo,
        key: &IndexKey,
        sibling: bool,
        order: Order,
    ) -> Result<Option<IndexNode>> {
        let past = order.past();
        let mut left = self.get_node(
            tx,
            match order {
                Order::Ascending => index.head,
                Order::Descending => index.tail,
            },
        )?;

        for level in (0..INDEX_MAX_LEVELS).rev() {
            loop {
                let address = order.step(&left, level);
                if address.is_empty() {
                    break;
                }
                let right = self.get_node(tx, address)?;
                let diff = right.key.compare(key, self.collation());

                if diff == past {
                    if level == 0 && sibling {
                        return Ok((!right.key.is_sentinel()).then_some(right));
                    }
                    break;
                }
                if diff == Ordering::Equal {
                    return Ok(Some(right));
                }
                left = right;
            }
        }
        Ok(None)
    }

    /// Remove the node at `address` and every node chained after it through
    /// `next_node`. Returns how many nodes were removed.
    pub fn delete_all(&self, tx: &mut Transaction<'_>, address: PageAddress) -> Result<usize> {
        let mut current = address;
        let mut deleted = 0;
        while !current.is_empty() {
            let node = self.get_node(tx, current)?;
            self.delete_single_node(tx, &node)?;
            current = node.next_node;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn delete_single_node(&self, tx: &mut Transaction<'_>, node: &IndexNode) -> Result<()> {
        assert!(!node.key.is_sentinel(), "sentinel nodes cannot be deleted");

        for level in 0..node.levels as usize {
            let prev = node.prev[level];
            let next = node.next[level];
            if !prev.is_empty() {
                IndexNode::set_next(tx.page_mut(prev.page_id)?, prev.index, level, next);
            }
            if !next.is_empty() {
                IndexNode::set_prev(tx.page_mut(next.page_id)?, next.index, level, prev);
            }
        }
        tx.page_mut(node.address.page_id)?.delete(node.address.index);
        Ok(())
    }

    /// Level-0 walk over every node of `index`, sentinels excluded.
    pub fn scan<'t, 'a>(
        &'t self,
        tx: &'t Transaction<'a>,
        index: &IndexInfo,
        order: Order,
    ) -> Result<IndexScan<'t, 'a>> {
        let start = match order {
            Order::Ascending => index.head,
            Order::Descending => index.tail,
        };
        let first = order.step(&self.get_node(tx, start)?, 0);
        Ok(IndexScan {
            service: self,
            tx,
            next: first,
            order,
        })
    }

    /// Level-0 walk starting at (and including) `node`.
    pub fn scan_from<'t, 'a>(
        &'t self,
        tx: &'t Transaction<'a>,
        node: PageAddress,
        order: Order,
    ) -> IndexScan<'t, 'a> {
        IndexScan {
            service: self,
            tx,
            next: node,
            order,
        }
    }
}

impl Default for IndexService {
    fn default() -> Self {
        Self::new(Arc::new(BinaryCollation))
    }
}

/// Iterator over index nodes on level 0. Stops at the opposite sentinel.
pub struct IndexScan<'t, 'a> {
    service: &'t IndexService,
    tx: &'t Transaction<'a>,
    next: PageAddress,
    order: Order,
}

impl Iterator for IndexScan<'_, '_> {
    type Item = Result<IndexNode>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_empty() {
            return None;
        }
        match self.service.get_node(self.tx, self.next) {
            Ok(node) if node.key.is_sentinel() => {
                self.next = PageAddress::EMPTY;
                None
            }
            Ok(node) => {
                self.next = self.order.step(&node, 0);
                Some(Ok(node))
            }
            Err(e) => {
                self.next = PageAddress::EMPTY;
                Some(Err(e))
            }
        }
    }
}
