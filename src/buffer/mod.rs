//! Page buffers and the shared page cache.
//!
//! The cache is the in-memory layer between the page services and disk. It
//! holds committed page images that any number of transactions may read at
//! once.
//!
//! # Components
//! - [`PageCache`] - Maps page ids to shared buffers, evicts with LRU
//! - [`PagePool`] - Recycles buffers through a free list
//! - [`PageBuffer`] - A page plus share counter and timestamp
//! - [`SharedPage`] - RAII guard holding one share
//! - [`CacheStats`] - Performance statistics
//! - [`replacer`] - Eviction policy implementation

mod page_buffer;
mod page_cache;
mod page_guard;
mod page_pool;
pub mod replacer;
mod stats;

pub use page_buffer::PageBuffer;
pub use page_cache::PageCache;
pub use page_guard::SharedPage;
pub use page_pool::PagePool;
pub use stats::{CacheStats, StatsSnapshot};
