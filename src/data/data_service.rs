//! Data Service - document payloads as chains of data blocks.

use log::trace;

use crate::common::config::{DATA_BLOCK_FIXED_SIZE, DATA_BLOCK_MAX_CONTENT};
use crate::common::{PageAddress, Result};
use crate::concurrency::Transaction;
use crate::storage::page::{Page, PageType};

const P_EXTEND: usize = 0;
const P_NEXT_BLOCK: usize = 1;
const P_BUFFER: usize = DATA_BLOCK_FIXED_SIZE;

/// One decoded block header.
///
/// # Segment Layout
/// ```text
/// 0     1    extend (0 = first block of a document, 1 = continuation)
/// 1     5    next_block
/// 6..        payload
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataBlock {
    pub address: PageAddress,
    pub extend: bool,
    pub next_block: PageAddress,
    pub payload_len: usize,
}

impl DataBlock {
    fn segment(page: &Page, index: u8) -> &[u8] {
        assert_eq!(
            page.page_type(),
            PageType::Data,
            "{} is not a data page",
            page.page_id()
        );
        page.get(index)
    }

    pub fn read(page: &Page, index: u8) -> Self {
        let data = Self::segment(page, index);
        Self {
            address: PageAddress::new(page.page_id(), index),
            extend: data[P_EXTEND] != 0,
            next_block: PageAddress::from_bytes(&data[P_NEXT_BLOCK..]),
            payload_len: data.len() - P_BUFFER,
        }
    }

    /// Decode the block in slot `index` and append its payload to `out`.
    fn read_into(page: &Page, index: u8, out: &mut Vec<u8>) -> Self {
        out.extend_from_slice(&Self::segment(page, index)[P_BUFFER..]);
        Self::read(page, index)
    }
}

/// Stores opaque payloads in the data pages of a collection.
///
/// A payload larger than one block is split; blocks are chained through
/// `next_block` and only the first is addressed from outside.
#[derive(Debug, Default)]
pub struct DataService;

impl DataService {
    pub fn new() -> Self {
        Self
    }

    /// Store `bytes` and return the address of the first block.
    pub fn insert(&self, tx: &mut Transaction<'_>, col_id: u8, bytes: &[u8]) -> Result<PageAddress> {
        let mut first = PageAddress::EMPTY;
        let mut previous = PageAddress::EMPTY;

        let mut chunks: Vec<&[u8]> = bytes.chunks(DATA_BLOCK_MAX_CONTENT).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        for (i, chunk) in chunks.into_iter().enumerate() {
            let length = DATA_BLOCK_FIXED_SIZE + chunk.len();
            let page_id = tx.get_free_page(col_id, PageType::Data, length)?;
            let page = tx.page_mut(page_id)?;

            let (index, data) = page.insert(length);
            data[P_EXTEND] = u8::from(i > 0);
            PageAddress::EMPTY.write_to(&mut data[P_NEXT_BLOCK..]);
            data[P_BUFFER..].copy_from_slice(chunk);
            let address = PageAddress::new(page_id, index);

            if previous.is_empty() {
                first = address;
            } else {
                let page = tx.page_mut(previous.page_id)?;
                address.write_to(&mut page.get_mut(previous.index)[P_NEXT_BLOCK..]);
            }
            previous = address;
        }

        trace!("stored {} byte(s) at {}", bytes.len(), first);
        Ok(first)
    }

    /// Reassemble the payload starting at `address`.
    pub fn read(&self, tx: &Transaction<'_>, address: PageAddress) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut current = address;
        while !current.is_empty() {
            let block = tx.read_page(current.page_id, |page| {
                DataBlock::read_into(page, current.index, &mut out)
            })?;
            current = block.next_block;
        }
        Ok(out)
    }

    /// Remove every block of the payload at `address`. Returns the number
    /// of blocks removed.
    pub fn delete(&self, tx: &mut Transaction<'_>, address: PageAddress) -> Result<usize> {
        let mut current = address;
        let mut deleted = 0;
        while !current.is_empty() {
            let block = tx.read_page(current.page_id, |page| DataBlock::read(page, current.index))?;
            tx.page_mut(current.page_id)?.delete(current.index);
            current = block.next_block;
            deleted += 1;
        }
        Ok(deleted)
    }
}
