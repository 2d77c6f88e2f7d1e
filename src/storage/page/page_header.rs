//! Page header and type definitions.
//!
//! Every page starts with a [`PageHeader`] containing metadata:
//! - page id and [`PageType`] discriminator
//! - owning collection id
//! - slotted-arena bookkeeping (item count, used/fragmented bytes)
//! - write-ahead log fields (transaction id, confirmation flag)
//! - CRC32 checksum for torn-write detection

use crate::common::config::PAGE_HEADER_SIZE;
use crate::common::PageId;

/// Type of page stored on disk.
///
/// Uses `#[repr(u8)]` to guarantee a 1-byte representation for serialization.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Never written, or released back to the allocation map.
    #[default]
    Empty = 0,
    /// File header page (page 0 of the data and log files).
    Header = 1,
    /// Document data blocks.
    Data = 2,
    /// Skip-list index nodes.
    Index = 3,
    /// Allocation-map page.
    AllocationMap = 4,
}

impl PageType {
    /// Convert from u8, returning `None` for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageType::Empty),
            1 => Some(PageType::Header),
            2 => Some(PageType::Data),
            3 => Some(PageType::Index),
            4 => Some(PageType::AllocationMap),
            _ => None,
        }
    }
}

/// Metadata stored at the beginning of every page.
///
/// # Layout (32 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     page_id (little-endian)
/// 4       1     page_type
/// 5       1     col_id
/// 6       1     items_count
/// 7       1     footer_slots (slots in use at the end of the page)
/// 8       2     used_bytes
/// 10      2     fragmented_bytes
/// 12      2     next_free_position
/// 14      1     is_confirmed
/// 15      1     reserved
/// 16      4     transaction_id
/// 20      4     checksum (CRC32)
/// 24      8     reserved
/// ```
///
/// # Checksum
/// The checksum is computed over the entire page with the checksum field
/// itself set to zero. This allows verification without special handling.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub page_type: PageType,
    pub col_id: u8,
    pub items_count: u8,
    pub footer_slots: u8,
    pub used_bytes: u16,
    pub fragmented_bytes: u16,
    pub next_free_position: u16,
    /// Set on the last page a transaction writes to the log.
    pub is_confirmed: bool,
    /// Transaction that wrote this page image (log pages only).
    pub transaction_id: u32,
    pub checksum: u32,
}

impl PageHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = PAGE_HEADER_SIZE;

    /// Offset of each field within the header.
    pub const OFFSET_PAGE_ID: usize = 0;
    pub const OFFSET_PAGE_TYPE: usize = 4;
    pub const OFFSET_COL_ID: usize = 5;
    pub const OFFSET_ITEMS_COUNT: usize = 6;
    pub const OFFSET_FOOTER_SLOTS: usize = 7;
    pub const OFFSET_USED_BYTES: usize = 8;
    pub const OFFSET_FRAGMENTED_BYTES: usize = 10;
    pub const OFFSET_NEXT_FREE_POSITION: usize = 12;
    pub const OFFSET_IS_CONFIRMED: usize = 14;
    pub const OFFSET_TRANSACTION_ID: usize = 16;
    pub const OFFSET_CHECKSUM: usize = 20;

    /// Create a header for a freshly formatted page.
    pub fn new(page_id: PageId, page_type: PageType, col_id: u8) -> Self {
        Self {
            page_id,
            page_type,
            col_id,
            next_free_position: Self::SIZE as u16,
            ..Self::default()
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// Unknown page types decode as [`PageType::Empty`]; callers that care
    /// (the disk stream) validate the raw byte themselves.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        Self {
            page_id: PageId(read_u32(data, Self::OFFSET_PAGE_ID)),
            page_type: PageType::from_u8(data[Self::OFFSET_PAGE_TYPE]).unwrap_or_default(),
            col_id: data[Self::OFFSET_COL_ID],
            items_count: data[Self::OFFSET_ITEMS_COUNT],
            footer_slots: data[Self::OFFSET_FOOTER_SLOTS],
            used_bytes: read_u16(data, Self::OFFSET_USED_BYTES),
            fragmented_bytes: read_u16(data, Self::OFFSET_FRAGMENTED_BYTES),
            next_free_position: read_u16(data, Self::OFFSET_NEXT_FREE_POSITION),
            is_confirmed: data[Self::OFFSET_IS_CONFIRMED] != 0,
            transaction_id: read_u32(data, Self::OFFSET_TRANSACTION_ID),
            checksum: read_u32(data, Self::OFFSET_CHECKSUM),
        }
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        data[..Self::SIZE].fill(0);
        write_u32(data, Self::OFFSET_PAGE_ID, self.page_id.0);
        data[Self::OFFSET_PAGE_TYPE] = self.page_type as u8;
        data[Self::OFFSET_COL_ID] = self.col_id;
        data[Self::OFFSET_ITEMS_COUNT] = self.items_count;
        data[Self::OFFSET_FOOTER_SLOTS] = self.footer_slots;
        write_u16(data, Self::OFFSET_USED_BYTES, self.used_bytes);
        write_u16(data, Self::OFFSET_FRAGMENTED_BYTES, self.fragmented_bytes);
        write_u16(data, Self::OFFSET_NEXT_FREE_POSITION, self.next_free_position);
        data[Self::OFFSET_IS_CONFIRMED] = self.is_confirmed as u8;
        write_u32(data, Self::OFFSET_TRANSACTION_ID, self.transaction_id);
        write_u32(data, Self::OFFSET_CHECKSUM, self.checksum);
    }

    /// Compute CRC32 checksum of a page.
    ///
    /// The checksum is computed with the checksum field zeroed out,
    /// so the checksum doesn't include itself.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&page_data[Self::OFFSET_CHECKSUM + 4..]);
        hasher.finalize()
    }

    /// Verify that the stored checksum matches the computed checksum.
    pub fn verify_checksum(&self, page_data: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(page_data)
    }
}

#[inline]
pub(crate) fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub(crate) fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
pub(crate) fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PAGE_SIZE;

    #[test]
    fn test_page_type_from_u8() {
        assert_eq!(PageType::from_u8(0), Some(PageType::Empty));
        assert_eq!(PageType::from_u8(1), Some(PageType::Header));
        assert_eq!(PageType::from_u8(2), Some(PageType::Data));
        assert_eq!(PageType::from_u8(3), Some(PageType::Index));
        assert_eq!(PageType::from_u8(4), Some(PageType::AllocationMap));
        assert_eq!(PageType::from_u8(200), None);
    }

    #[test]
    fn test_page_header_new() {
        let header = PageHeader::new(PageId(9), PageType::Index, 3);
        assert_eq!(header.page_id, PageId(9));
        assert_eq!(header.col_id, 3);
        assert_eq!(header.items_count, 0);
        assert_eq!(header.next_free_position as usize, PAGE_HEADER_SIZE);
        assert!(!header.is_confirmed);
    }

    #[test]
    fn test_page_header_roundtrip() {
        let original = PageHeader {
            page_id: PageId(77),
            page_type: PageType::Data,
            col_id: 12,
            items_count: 4,
            footer_slots: 6,
            used_bytes: 900,
            fragmented_bytes: 40,
            next_free_position: 972,
            is_confirmed: true,
            transaction_id: 0xABCD,
            checksum: 0xDEADBEEF,
        };

        let mut buffer = [0u8; PageHeader::SIZE];
        original.write_to(&mut buffer);

        assert_eq!(PageHeader::from_bytes(&buffer), original);
    }

    #[test]
    fn test_page_header_byte_layout() {
        let header = PageHeader {
            page_id: PageId(0x04030201),
            page_type: PageType::AllocationMap,
            checksum: 0x0D0C0B0A,
            ..PageHeader::default()
        };

        let mut buffer = [0u8; PageHeader::SIZE];
        header.write_to(&mut buffer);

        assert_eq!(&buffer[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(buffer[4], 4);
        assert_eq!(&buffer[20..24], &[0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn test_checksum_ignores_checksum_field() {
        let mut page_data = [0u8; PAGE_SIZE];
        page_data[100] = 0xAB;

        let checksum1 = PageHeader::compute_checksum(&page_data);
        page_data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4].fill(0xFF);
        let checksum2 = PageHeader::compute_checksum(&page_data);

        assert_eq!(checksum1, checksum2);
    }

    #[test]
    fn test_checksum_verify() {
        let mut page_data = [0u8; PAGE_SIZE];
        page_data[100] = 0xAB;

        let header = PageHeader {
            checksum: PageHeader::compute_checksum(&page_data),
            ..PageHeader::default()
        };
        assert!(header.verify_checksum(&page_data));

        page_data[100] = 0xFF;
        assert!(!header.verify_checksum(&page_data));
    }
}
