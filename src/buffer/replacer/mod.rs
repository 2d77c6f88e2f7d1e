//! Eviction policy implementations (replacers).
//!
//! - [`LruReplacer`] - least recently rented page goes first

mod lru;

pub use lru::LruReplacer;
