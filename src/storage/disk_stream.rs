//! Disk Stream - low-level file I/O for pages.
//!
//! The [`DiskStream`] handles all direct file operations:
//! - Writing and validating the file header
//! - Reading and writing pages (transparently encrypted when configured)
//! - Sizing, zero-filling and flushing the file

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::common::config::{FILE_HEADER_SIZE, PAGE_SIZE};
use crate::common::{Error, Result};
use crate::storage::cipher::PageCipher;
use crate::storage::file_header::{FileHeader, FileKind};
use crate::storage::page::Page;

/// Outcome of reading one page position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Never written: all bytes zero on disk. The page is zeroed.
    Blank,
    /// Checksum verified.
    Valid,
    /// Checksum mismatch (torn or corrupted write).
    Torn,
}

/// Manages disk I/O for a single file (data file or log).
///
/// # File Layout
/// ```text
/// ┌──────────────┬─────────┬─────────┬─────────┬─────────┐
/// │ File header  │  Pos 0  │  Pos 1  │  ...    │  Pos N  │
/// │ (4KB, plain) │  (4KB)  │  (4KB)  │         │  (4KB)  │
/// └──────────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0          4096     8192      ...   4096 + N×4096
/// ```
///
/// Position N is located at file offset `FILE_HEADER_SIZE + N × PAGE_SIZE`.
/// In the data file the position is the page id.
///
/// # Thread Safety
/// `DiskStream` is **single-threaded**. Owners wrap it in a mutex.
///
/// # Durability
/// Writes are not synced individually; call [`DiskStream::flush`] at
/// commit and checkpoint boundaries.
pub struct DiskStream {
    file: File,
    path: PathBuf,
    header: FileHeader,
    cipher: Option<PageCipher>,
    /// Number of complete page positions in the file.
    page_count: u32,
    scratch: Box<Page>,
}

impl DiskStream {
    /// Create a new file and write its header.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(
        path: P,
        kind: FileKind,
        password: Option<&str>,
        kdf_rounds: u32,
    ) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;

        let mut header = FileHeader::new(kind);
        let cipher = password.map(|password| {
            header.encrypted = true;
            header.salt = PageCipher::new_salt();
            header.kdf_rounds = kdf_rounds;
            let cipher = PageCipher::new(password, &header.salt, kdf_rounds);
            header.password_check = cipher.password_check();
            cipher
        });

        file.write_all(header.to_page().as_slice())?;
        file.sync_all()?;

        debug!(
            "created {:?} file {} (encrypted: {})",
            kind,
            path.as_ref().display(),
            header.encrypted
        );

        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            header,
            cipher,
            page_count: 0,
            scratch: Box::new(Page::new()),
        })
    }

    /// Open an existing file and validate its header.
    ///
    /// # Errors
    /// - `StructuralCorruption` if the header is missing or invalid
    /// - `InvalidPassword` if the password does not match the file
    pub fn open<P: AsRef<Path>>(path: P, kind: FileKind, password: Option<&str>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let file_size = file.metadata()?.len();
        if file_size < FILE_HEADER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "file is too small ({} bytes)",
                file_size
            )));
        }

        let mut page = Page::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(page.as_mut_slice())?;
        let header = FileHeader::from_page(&page, kind)?;

        let cipher = match (header.encrypted, password) {
            (true, Some(password)) => {
                let cipher = PageCipher::new(password, &header.salt, header.kdf_rounds);
                if !cipher.verify(&header.password_check) {
                    return Err(Error::InvalidPassword);
                }
                Some(cipher)
            }
            (false, None) => None,
            _ => return Err(Error::InvalidPassword),
        };

        let page_count = ((file_size - FILE_HEADER_SIZE as u64) / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            header,
            cipher,
            page_count,
            scratch: Box::new(Page::new()),
        })
    }

    /// Open an existing file, or create it if it doesn't exist.
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        kind: FileKind,
        password: Option<&str>,
        kdf_rounds: u32,
    ) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, kind, password)
        } else {
            Self::create(path, kind, password, kdf_rounds)
        }
    }

    #[inline]
    fn offset(position: u32) -> u64 {
        FILE_HEADER_SIZE as u64 + position as u64 * PAGE_SIZE as u64
    }

    /// Read the page at `position`, reporting blank and torn pages.
    ///
    /// # Errors
    /// `PageNotFound` if the position is past the end of the file.
    pub fn load_page(&mut self, position: u32, page: &mut Page) -> Result<PageState> {
        if position >= self.page_count {
            return Err(Error::PageNotFound(position));
        }

        self.file.seek(SeekFrom::Start(Self::offset(position)))?;
        self.file.read_exact(page.as_mut_slice())?;

        if page.is_blank() {
            return Ok(PageState::Blank);
        }
        if let Some(cipher) = &self.cipher {
            cipher.decrypt(page.as_mut_slice());
        }

        Ok(if page.verify_checksum() {
            PageState::Valid
        } else {
            PageState::Torn
        })
    }

    /// Read the page at `position`.
    ///
    /// # Errors
    /// - `PageNotFound` if the position is past the end of the file
    /// - `StructuralCorruption` if the stored checksum does not match
    pub fn read_page(&mut self, position: u32, page: &mut Page) -> Result<()> {
        match self.load_page(position, page)? {
            PageState::Blank | PageState::Valid => Ok(()),
            PageState::Torn => Err(Error::corruption(format!(
                "checksum mismatch at position {} of {}",
                position,
                self.path.display()
            ))),
        }
    }

    /// Write `page` at `position`, extending the file when needed.
    ///
    /// The checksum is computed on the way out; `page` itself is untouched.
    pub fn write_page(&mut self, position: u32, page: &Page) -> Result<()> {
        self.scratch.copy_from(page);
        self.scratch.update_checksum();
        if let Some(cipher) = &self.cipher {
            cipher.encrypt(self.scratch.as_mut_slice());
        }

        self.file.seek(SeekFrom::Start(Self::offset(position)))?;
        self.file.write_all(self.scratch.as_slice())?;

        self.page_count = self.page_count.max(position + 1);
        Ok(())
    }

    /// Zero the positions `from..=to` on disk (they read back as blank).
    pub fn write_empty_pages(&mut self, from: u32, to: u32) -> Result<()> {
        let zeros = [0u8; PAGE_SIZE];
        for position in from..=to {
            self.file.seek(SeekFrom::Start(Self::offset(position)))?;
            self.file.write_all(&zeros)?;
        }
        self.page_count = self.page_count.max(to + 1);
        Ok(())
    }

    /// Resize the body to exactly `page_count` positions.
    pub fn set_size(&mut self, page_count: u32) -> Result<()> {
        self.file.set_len(Self::offset(page_count))?;
        self.page_count = page_count;
        Ok(())
    }

    /// fsync the file.
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Last complete position, if the body is not empty.
    pub fn last_position(&self) -> Option<u32> {
        self.page_count.checked_sub(1)
    }

    /// Get the number of complete page positions.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Get the total size of the file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        Self::offset(self.page_count)
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;
    use crate::storage::page::PageType;
    use tempfile::tempdir;

    fn data_page(id: u32, byte: u8) -> Page {
        let mut page = Page::new();
        page.format(PageId(id), PageType::Data, 1);
        let (_, segment) = page.insert(64);
        segment.fill(byte);
        page
    }

    #[test]
    fn test_create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let ds = DiskStream::create(&path, FileKind::Data, None, 0).unwrap();
        assert_eq!(ds.page_count(), 0);
        assert_eq!(ds.file_size(), FILE_HEADER_SIZE as u64);
        assert_eq!(ds.last_position(), None);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        DiskStream::create(&path, FileKind::Data, None, 0).unwrap();
        assert!(DiskStream::create(&path, FileKind::Data, None, 0).is_err());
    }

    #[test]
    fn test_write_and_read_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let mut ds = DiskStream::create(&path, FileKind::Data, None, 0).unwrap();
        ds.write_page(0, &data_page(0, 0xAB)).unwrap();

        let mut page = Page::new();
        ds.read_page(0, &mut page).unwrap();
        assert_eq!(page.get(0), &[0xAB; 64][..]);
        assert_eq!(page.page_id(), PageId(0));
    }

    #[test]
    fn test_read_past_end_is_not_found() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let mut ds = DiskStream::create(&path, FileKind::Data, None, 0).unwrap();
        let mut page = Page::new();
        assert!(matches!(
            ds.read_page(0, &mut page),
            Err(Error::PageNotFound(0))
        ));
    }

    #[test]
    fn test_sparse_positions_read_blank() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let mut ds = DiskStream::create(&path, FileKind::Data, Some("pw"), 100).unwrap();
        ds.write_page(3, &data_page(3, 1)).unwrap();
        assert_eq!(ds.page_count(), 4);

        let mut page = Page::new();
        assert_eq!(ds.load_page(1, &mut page).unwrap(), PageState::Blank);
        assert!(page.is_blank());
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        {
            let mut ds = DiskStream::create(&path, FileKind::Data, None, 0).unwrap();
            ds.write_page(0, &data_page(0, 0x42)).unwrap();
            ds.flush().unwrap();
        }

        let mut ds = DiskStream::open(&path, FileKind::Data, None).unwrap();
        assert_eq!(ds.page_count(), 1);

        let mut page = Page::new();
        ds.read_page(0, &mut page).unwrap();
        assert_eq!(page.get(0), &[0x42; 64][..]);
    }

    #[test]
    fn test_encrypted_file_hides_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.qdb");

        {
            let mut ds = DiskStream::create(&path, FileKind::Data, Some("pw"), 100).unwrap();
            ds.write_page(0, &data_page(0, 0x5A)).unwrap();
            ds.flush().unwrap();
        }

        let raw = std::fs::read(&path).unwrap();
        let body = &raw[FILE_HEADER_SIZE..];
        assert!(!body.windows(64).any(|w| w.iter().all(|&b| b == 0x5A)));

        let mut ds = DiskStream::open(&path, FileKind::Data, Some("pw")).unwrap();
        assert!(ds.is_encrypted());
        let mut page = Page::new();
        ds.read_page(0, &mut page).unwrap();
        assert_eq!(page.get(0), &[0x5A; 64][..]);
    }

    #[test]
    fn test_wrong_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.qdb");

        DiskStream::create(&path, FileKind::Data, Some("pw"), 100).unwrap();

        assert!(matches!(
            DiskStream::open(&path, FileKind::Data, Some("nope")),
            Err(Error::InvalidPassword)
        ));
        assert!(matches!(
            DiskStream::open(&path, FileKind::Data, None),
            Err(Error::InvalidPassword)
        ));
    }

    #[test]
    fn test_bad_magic_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.qdb");
        std::fs::write(&path, vec![0x11u8; FILE_HEADER_SIZE + PAGE_SIZE]).unwrap();

        assert!(matches!(
            DiskStream::open(&path, FileKind::Data, None),
            Err(Error::StructuralCorruption(_))
        ));
    }

    #[test]
    fn test_torn_page_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let mut ds = DiskStream::create(&path, FileKind::Data, None, 0).unwrap();
        ds.write_page(0, &data_page(0, 9)).unwrap();
        ds.flush().unwrap();
        drop(ds);

        let mut raw = std::fs::read(&path).unwrap();
        raw[FILE_HEADER_SIZE + 100] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let mut ds = DiskStream::open(&path, FileKind::Data, None).unwrap();
        let mut page = Page::new();
        assert_eq!(ds.load_page(0, &mut page).unwrap(), PageState::Torn);
        assert!(ds.read_page(0, &mut page).is_err());
    }

    #[test]
    fn test_set_size_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.qdb");

        let mut ds = DiskStream::create(&path, FileKind::Log, None, 0).unwrap();
        for i in 0..5 {
            ds.write_page(i, &data_page(i, i as u8)).unwrap();
        }
        ds.set_size(0).unwrap();

        assert_eq!(ds.page_count(), 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), FILE_HEADER_SIZE as u64);
    }
}
