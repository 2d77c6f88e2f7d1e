//! Location of one page image in the write-ahead log.

use std::fmt;

use crate::common::PageId;

/// Where a page image lives in the log and where it belongs in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    /// Slot in the log file.
    pub position_id: u32,
    /// Page the image is a version of.
    pub page_id: PageId,
    /// Home position in the data file.
    pub physical_id: u32,
    pub confirmed: bool,
}

impl LogPosition {
    pub fn new(position_id: u32, page_id: PageId) -> Self {
        Self {
            position_id,
            page_id,
            physical_id: page_id.0,
            confirmed: false,
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "log {} -> {} (physical {}, {})",
            self.position_id,
            self.page_id,
            self.physical_id,
            if self.confirmed { "confirmed" } else { "pending" }
        )
    }
}
