//! Configuration constants and engine settings for QuillStore.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Size of a page in bytes (4KB).
///
/// # Memory Layout
/// With 4KB pages and 32-bit PageIds:
/// - Max pages: 2^32 = 4,294,967,296 pages
/// - Max database size: 4,294,967,296 × 4KB = 16TB
///
/// Every in-page position fits in a `u16`.
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of pages with u32 PageId.
pub const MAX_PAGES: u64 = (u32::MAX as u64) + 1;

/// Maximum theoretical database size in bytes.
pub const MAX_DB_SIZE_BYTES: u64 = MAX_PAGES * PAGE_SIZE as u64;

// ============================================================================
// File and page layout
// ============================================================================

/// The file header occupies one full page, so the page body stays aligned.
pub const FILE_HEADER_SIZE: usize = PAGE_SIZE;

/// Bytes reserved at the start of every page for the [`PageHeader`].
///
/// [`PageHeader`]: crate::storage::page::PageHeader
pub const PAGE_HEADER_SIZE: usize = 32;

/// One slot footer entry: position (u16) + length (u16).
pub const SLOT_SIZE: usize = 4;

/// Slot indexes are stored in a `u8`; 255 is the empty-address marker.
pub const MAX_ITEMS_PER_PAGE: usize = 255;

/// Largest single segment an empty page can hold.
pub const MAX_SEGMENT_LENGTH: usize = PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_SIZE;

// ============================================================================
// Allocation map geometry
// ============================================================================

/// Pages per extent, the unit of growth for a collection.
pub const EXTENT_SIZE: usize = 8;

/// One extent entry: owner col id (1 byte) + 8 × 3-bit classes (3 bytes).
pub const AM_EXTENT_ENTRY_SIZE: usize = 4;

/// Extent entries stored on one allocation-map page.
pub const AM_EXTENTS_PER_PAGE: usize = (PAGE_SIZE - PAGE_HEADER_SIZE) / AM_EXTENT_ENTRY_SIZE;

/// Data/index pages covered by one allocation-map page.
pub const AM_PAGES_PER_MAP: u32 = (AM_EXTENTS_PER_PAGE * EXTENT_SIZE) as u32;

/// Distance between consecutive allocation-map page ids.
///
/// Map page `k` lives at page id `k * AM_PAGE_STEP` and is followed by the
/// `AM_PAGES_PER_MAP` pages it describes.
pub const AM_PAGE_STEP: u32 = AM_PAGES_PER_MAP + 1;

/// A data page is "small-free" when at least this many bytes are free.
pub const AM_DATA_PAGE_SPACE_SMALL: usize = 500;

/// A data page is "medium-free" when at least this many bytes are free.
pub const AM_DATA_PAGE_SPACE_MEDIUM: usize = 1500;

/// A data page is "large-free" when at least this many bytes are free.
pub const AM_DATA_PAGE_SPACE_LARGE: usize = 3000;

// ============================================================================
// Index and data block limits
// ============================================================================

/// Maximum skip-list height.
pub const INDEX_MAX_LEVELS: usize = 32;

/// Maximum encoded key payload.
pub const INDEX_MAX_KEY_LENGTH: usize = 255;

/// slot + levels + data block address + next node address.
pub const INDEX_NODE_FIXED_SIZE: usize = 1 + 1 + 5 + 5;

/// Largest possible node: full height plus the largest key.
pub const INDEX_NODE_MAX_LENGTH: usize =
    INDEX_NODE_FIXED_SIZE + INDEX_MAX_LEVELS * 10 + 2 + INDEX_MAX_KEY_LENGTH;

/// extend flag + next block address.
pub const DATA_BLOCK_FIXED_SIZE: usize = 1 + 5;

/// Payload bytes a single data block can carry.
pub const DATA_BLOCK_MAX_CONTENT: usize = MAX_SEGMENT_LENGTH - DATA_BLOCK_FIXED_SIZE;

// ============================================================================
// Engine settings
// ============================================================================

/// Default number of pages the shared cache keeps resident.
pub const DEFAULT_CACHE_MAX_PAGES: usize = 1024;

/// Default ceiling for lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default PBKDF2 iteration count for encrypted files.
pub const DEFAULT_KDF_ROUNDS: u32 = 10_000;

/// Settings for opening an [`Engine`](crate::Engine).
///
/// # Example
/// ```
/// use std::time::Duration;
/// use quillstore::EngineSettings;
///
/// let settings = EngineSettings::new("data.qdb")
///     .cache_max_pages(256)
///     .lock_timeout(Duration::from_secs(5));
///
/// assert_eq!(settings.cache_max_pages, 256);
/// assert!(settings.password.is_none());
/// ```
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Path of the data file. The write-ahead log lives beside it.
    pub filename: PathBuf,
    /// Enables transparent page encryption when set.
    pub password: Option<String>,
    /// Resident page budget for the shared cache.
    pub cache_max_pages: usize,
    /// Ceiling for lock waits (transactions, checkpoint, shutdown).
    pub lock_timeout: Duration,
    /// PBKDF2 rounds used when deriving the page key.
    pub kdf_rounds: u32,
}

impl EngineSettings {
    pub fn new<P: AsRef<Path>>(filename: P) -> Self {
        Self {
            filename: filename.as_ref().to_path_buf(),
            password: None,
            cache_max_pages: DEFAULT_CACHE_MAX_PAGES,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            kdf_rounds: DEFAULT_KDF_ROUNDS,
        }
    }

    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn cache_max_pages(mut self, pages: usize) -> Self {
        self.cache_max_pages = pages;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn kdf_rounds(mut self, rounds: u32) -> Self {
        self.kdf_rounds = rounds;
        self
    }

    /// Path of the write-ahead log: `<filename>-log`.
    pub fn log_filename(&self) -> PathBuf {
        let mut name = self.filename.as_os_str().to_owned();
        name.push("-log");
        PathBuf::from(name)
    }
}
