//! Common types and utilities shared across QuillStore.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`EngineSettings`](config::EngineSettings)
//! - Error types
//! - Identifiers (PageId, BufferId, PageAddress)

mod buffer_id;
pub mod config;
pub mod error;
mod page_address;
mod page_id;

pub use buffer_id::BufferId;
pub use error::{Error, Result};
pub use page_address::PageAddress;
pub use page_id::PageId;
