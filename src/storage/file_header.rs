//! File header - the first page of the data file and of the log.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::config::PAGE_HEADER_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::{Page, PageType};

/// Magic string identifying a QuillStore file.
pub const FILE_MAGIC: &[u8; 16] = b"** QuillStore **";

/// Current on-disk format version.
pub const FILE_VERSION: u8 = 1;

/// Length of the PBKDF2 salt stored in the header.
pub const ENCRYPTION_SALT_SIZE: usize = 16;

/// Which of the two files a header belongs to.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Data = 1,
    Log = 2,
}

/// Parsed file header.
///
/// # Layout (inside a Header-type page, after the 32-byte page header)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 32      16    magic
/// 48      1     version
/// 49      1     file kind
/// 50      8     created_at (unix millis)
/// 58      1     encrypted flag
/// 59      16    salt
/// 75      16    password check block (encrypted with the derived key)
/// 91      4     kdf rounds
/// ```
///
/// The header page itself is never encrypted; it is protected by the
/// regular page checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub kind: FileKind,
    pub created_at: u64,
    pub encrypted: bool,
    pub salt: [u8; ENCRYPTION_SALT_SIZE],
    pub password_check: [u8; 16],
    pub kdf_rounds: u32,
}

impl FileHeader {
    const P_MAGIC: usize = PAGE_HEADER_SIZE;
    const P_VERSION: usize = Self::P_MAGIC + 16;
    const P_KIND: usize = Self::P_VERSION + 1;
    const P_CREATED_AT: usize = Self::P_KIND + 1;
    const P_ENCRYPTED: usize = Self::P_CREATED_AT + 8;
    const P_SALT: usize = Self::P_ENCRYPTED + 1;
    const P_PASSWORD_CHECK: usize = Self::P_SALT + ENCRYPTION_SALT_SIZE;
    const P_KDF_ROUNDS: usize = Self::P_PASSWORD_CHECK + 16;

    /// Header for a new plain file.
    pub fn new(kind: FileKind) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            kind,
            created_at,
            encrypted: false,
            salt: [0u8; ENCRYPTION_SALT_SIZE],
            password_check: [0u8; 16],
            kdf_rounds: 0,
        }
    }

    /// Render this header as a checksummed Header page.
    pub fn to_page(&self) -> Page {
        let mut page = Page::new();
        page.format(PageId::EMPTY, PageType::Header, 0);

        let data = page.as_mut_slice();
        data[Self::P_MAGIC..Self::P_MAGIC + 16].copy_from_slice(FILE_MAGIC);
        data[Self::P_VERSION] = FILE_VERSION;
        data[Self::P_KIND] = self.kind as u8;
        data[Self::P_CREATED_AT..Self::P_CREATED_AT + 8]
            .copy_from_slice(&self.created_at.to_le_bytes());
        data[Self::P_ENCRYPTED] = self.encrypted as u8;
        data[Self::P_SALT..Self::P_SALT + ENCRYPTION_SALT_SIZE].copy_from_slice(&self.salt);
        data[Self::P_PASSWORD_CHECK..Self::P_PASSWORD_CHECK + 16]
            .copy_from_slice(&self.password_check);
        data[Self::P_KDF_ROUNDS..Self::P_KDF_ROUNDS + 4]
            .copy_from_slice(&self.kdf_rounds.to_le_bytes());

        page.update_checksum();
        page
    }

    /// Parse and validate a header page.
    ///
    /// # Errors
    /// `StructuralCorruption` on bad magic, unknown version, wrong file kind
    /// or checksum mismatch.
    pub fn from_page(page: &Page, expected: FileKind) -> Result<Self> {
        let data = page.as_slice();

        if &data[Self::P_MAGIC..Self::P_MAGIC + 16] != FILE_MAGIC {
            return Err(Error::corruption("not a QuillStore file (bad magic)"));
        }
        if data[Self::P_VERSION] != FILE_VERSION {
            return Err(Error::corruption(format!(
                "unsupported file format version {}",
                data[Self::P_VERSION]
            )));
        }
        if page.page_type() != PageType::Header || !page.verify_checksum() {
            return Err(Error::corruption("file header checksum mismatch"));
        }

        let kind = match data[Self::P_KIND] {
            1 => FileKind::Data,
            2 => FileKind::Log,
            other => return Err(Error::corruption(format!("unknown file kind {}", other))),
        };
        if kind != expected {
            return Err(Error::corruption(format!(
                "expected a {:?} file, found {:?}",
                expected, kind
            )));
        }

        let mut created_at = [0u8; 8];
        created_at.copy_from_slice(&data[Self::P_CREATED_AT..Self::P_CREATED_AT + 8]);
        let mut salt = [0u8; ENCRYPTION_SALT_SIZE];
        salt.copy_from_slice(&data[Self::P_SALT..Self::P_SALT + ENCRYPTION_SALT_SIZE]);
        let mut password_check = [0u8; 16];
        password_check.copy_from_slice(&data[Self::P_PASSWORD_CHECK..Self::P_PASSWORD_CHECK + 16]);
        let mut kdf_rounds = [0u8; 4];
        kdf_rounds.copy_from_slice(&data[Self::P_KDF_ROUNDS..Self::P_KDF_ROUNDS + 4]);

        Ok(Self {
            kind,
            created_at: u64::from_le_bytes(created_at),
            encrypted: data[Self::P_ENCRYPTED] != 0,
            salt,
            password_check,
            kdf_rounds: u32::from_le_bytes(kdf_rounds),
        })
    }
}
