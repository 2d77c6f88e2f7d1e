//! Plain-text diagnostic renderings of pages and engine state.

use std::fmt;
use std::path::PathBuf;

use crate::allocation::PageClass;
use crate::buffer::StatsSnapshot;
use crate::common::PageId;
use crate::concurrency::LockSnapshot;
use crate::storage::page::Page;

/// A page header and its slot table.
pub struct PageDump {
    pub page: Box<Page>,
    /// Owner and class recorded in the allocation map.
    pub class: Option<(u8, PageClass)>,
}

impl fmt::Display for PageDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.page.header();
        write!(
            f,
            "{} [{:?}] col {}, {} item(s)",
            header.page_id, header.page_type, header.col_id, header.items_count
        )?;
        if let Some((owner, class)) = self.class {
            write!(f, ", map: col {} {:?}", owner, class)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "  used {}, fragmented {}, next free {}, free {}, footer {}",
            header.used_bytes,
            header.fragmented_bytes,
            header.next_free_position,
            self.page.free_bytes(),
            header.footer_slots
        )?;
        for index in self.page.slots() {
            if let Some((position, length)) = self.page.segment_bounds(index) {
                writeln!(f, "  slot {:>3}: position {:>4}, length {:>4}", index, position, length)?;
            }
        }
        Ok(())
    }
}

/// Snapshot of the engine's moving parts.
#[derive(Debug, Clone)]
pub struct EngineDump {
    pub filename: PathBuf,
    pub encrypted: bool,
    pub data_pages: u32,
    pub log_positions: u32,
    pub log_confirmed_pages: usize,
    pub cache_resident: usize,
    pub cache_max_pages: usize,
    pub cache_shared: usize,
    pub cache_shares: u64,
    pub pool_free: usize,
    pub pool_allocated: usize,
    pub stats: StatsSnapshot,
    pub version: u64,
    pub active_transactions: Vec<u32>,
    pub locks: LockSnapshot,
    pub map_pages: usize,
    pub last_page_id: PageId,
}

impl fmt::Display for EngineDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "engine {}{}",
            self.filename.display(),
            if self.encrypted { " (encrypted)" } else { "" }
        )?;
        writeln!(
            f,
            "  data: {} page(s), {} map page(s), last extent page {}",
            self.data_pages, self.map_pages, self.last_page_id
        )?;
        writeln!(
            f,
            "  log: {} position(s), {} confirmed page(s)",
            self.log_positions, self.log_confirmed_pages
        )?;
        writeln!(
            f,
            "  cache: {}/{} resident, {} shared ({} share(s)), pool {} free of {}",
            self.cache_resident,
            self.cache_max_pages,
            self.cache_shared,
            self.cache_shares,
            self.pool_free,
            self.pool_allocated
        )?;
        writeln!(f, "  {}", self.stats)?;
        writeln!(
            f,
            "  transactions: version {}, active {:?}",
            self.version, self.active_transactions
        )?;
        write!(
            f,
            "  locks: {} reader(s), exclusive {}, {} exclusive waiter(s), {} collection(s)",
            self.locks.readers, self.locks.exclusive, self.locks.exclusive_waiters, self.locks.collections
        )
    }
}
