//! Storage layer - disk I/O and page formats.
//!
//! This module handles persistent storage:
//! - [`DiskStream`] - Low-level file I/O with optional encryption
//! - [`FileHeader`] - The validated first page of every file
//! - [`page`] - Page types and layouts

pub mod cipher;
mod disk_stream;
mod file_header;
pub mod page;

pub use disk_stream::{DiskStream, PageState};
pub use file_header::{FileHeader, FileKind, ENCRYPTION_SALT_SIZE, FILE_MAGIC, FILE_VERSION};
