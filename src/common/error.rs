//! Error types for QuillStore.

use std::time::Duration;

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// All recoverable errors in QuillStore.
///
/// Broken internal invariants (a negative share counter, a node read from a
/// page that is not an index page, ...) are not represented here: those are
/// bugs and abort the operation with a panic.
///
/// Only [`Error::DuplicateKey`] and [`Error::LockTimeout`] are meant to be
/// handled by callers; see [`Error::is_recoverable`].
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk operations (including short reads and writes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The data file is not a QuillStore file, or was written by an
    /// incompatible format version. The file is unusable.
    #[error("structural corruption: {0}")]
    StructuralCorruption(String),

    /// The password does not decrypt the file.
    #[error("invalid password for encrypted data file")]
    InvalidPassword,

    /// A unique index already holds a node with an equal key.
    ///
    /// Other pages may already be dirty: the owning transaction must be
    /// rolled back.
    #[error("duplicate key in unique index (slot {slot})")]
    DuplicateKey { slot: u8 },

    /// A lock could not be acquired within the caller's timeout.
    #[error("lock not acquired within {0:?}")]
    LockTimeout(Duration),

    /// Requested page does not exist on disk.
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// MinValue/MaxValue are reserved for the head/tail sentinels.
    #[error("invalid index key: {0}")]
    InvalidIndexKey(&'static str),

    /// Index key exceeds the on-page limit.
    #[error("index key is {len} bytes, limit is {max}")]
    IndexKeyTooLong { len: usize, max: usize },

    /// Operation not allowed in the current engine or transaction state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    /// Whether the caller is expected to catch this error and act on it
    /// (roll back and retry, or retry the lock acquisition).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::DuplicateKey { .. } | Error::LockTimeout(_))
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::StructuralCorruption(msg.into())
    }
}
