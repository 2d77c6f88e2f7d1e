//! Allocation map - which pages belong to which collection, and how full
//! they are.
//!
//! - [`AllocationMapService`] - bucket-based best-fit page allocation
//! - [`AllocationMapPage`] - on-disk bitmap of extents and 3-bit classes
//! - [`PageClass`] - the free-space classes

mod allocation_map;
mod free_pages;
mod map_page;

pub use allocation_map::{AllocationMapService, MapUpdate};
pub use free_pages::{FreePagesSummary, PageClass};
pub use map_page::{map_page_id, AllocationMapPage, MapLocation};
