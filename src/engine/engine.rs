//! Engine - owns every service and exposes the transactional surface.

use std::fs;
use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex;

use crate::allocation::{AllocationMapService, FreePagesSummary, MapLocation, PageClass};
use crate::buffer::{PageCache, SharedPage, StatsSnapshot};
use crate::common::config::EngineSettings;
use crate::common::{Error, PageId, Result};
use crate::concurrency::{LockService, Transaction, TransactionMonitor};
use crate::recovery::LogService;
use crate::storage::page::Page;
use crate::storage::{DiskStream, FileKind};

use super::{EngineDump, PageDump};

/// An open data file.
///
/// # Architecture
/// ```text
/// Transaction ──► LockService (file shared + collection claims)
///      │
///      ├─ read ──► PageCache ──miss──► LogService (latest confirmed image)
///      │                          └──► DiskStream (data file)
///      ├─ space ─► AllocationMapService
///      └─ commit ► LogService (append, fsync) ─► PageCache::install
///
/// checkpoint ──► LockService (exclusive) ─► log → data file, map pages, clear log
/// ```
///
/// Every service is owned here; nothing is global. Dropping an engine
/// without [`shutdown`](Self::shutdown) leaves committed work in the log,
/// to be replayed by the next [`open`](Self::open).
pub struct Engine {
    settings: EngineSettings,
    pub(crate) disk: Mutex<DiskStream>,
    pub(crate) log: LogService,
    pub(crate) cache: PageCache,
    pub(crate) alloc: AllocationMapService,
    pub(crate) locks: LockService,
    pub(crate) monitor: TransactionMonitor,
}

impl Engine {
    /// Open (or create) the data file and its log, replaying any committed
    /// work left in the log.
    ///
    /// # Errors
    /// - `InvalidPassword` if the password does not match the file
    /// - `StructuralCorruption` for foreign or damaged files
    /// - `InvalidState` for a zero cache budget
    pub fn open(settings: EngineSettings) -> Result<Self> {
        if settings.cache_max_pages == 0 {
            return Err(Error::InvalidState("cache_max_pages must be > 0"));
        }

        let password = settings.password.as_deref();
        let log_path = settings.log_filename();
        if !settings.filename.exists() && log_path.exists() {
            warn!("removing log {} left without a data file", log_path.display());
            fs::remove_file(&log_path)?;
        }

        let mut disk =
            DiskStream::open_or_create(&settings.filename, FileKind::Data, password, settings.kdf_rounds)?;
        let log = LogService::new(DiskStream::open_or_create(
            &log_path,
            FileKind::Log,
            password,
            settings.kdf_rounds,
        )?);

        let recovered = log.recover()?;
        let moved = if recovered > 0 {
            log.checkpoint(&mut disk)?
        } else {
            Vec::new()
        };

        let alloc = AllocationMapService::new();
        alloc.initialize(&mut disk)?;
        alloc.update_map(&moved);
        alloc.persist(&mut disk)?;
        disk.flush()?;
        log.clear()?;

        if recovered > 0 {
            info!("recovered {} page(s) from {}", recovered, log_path.display());
        }
        info!(
            "opened {} ({} page(s){})",
            settings.filename.display(),
            disk.page_count(),
            if disk.is_encrypted() { ", encrypted" } else { "" }
        );

        Ok(Self {
            cache: PageCache::new(settings.cache_max_pages),
            disk: Mutex::new(disk),
            log,
            alloc,
            locks: LockService::new(),
            monitor: TransactionMonitor::new(),
            settings,
        })
    }

    /// Start a transaction over `col_ids`, waiting up to the configured
    /// lock timeout.
    pub fn begin_transaction(&self, col_ids: &[u8]) -> Result<Transaction<'_>> {
        self.begin_transaction_with_timeout(col_ids, self.settings.lock_timeout)
    }

    /// Start a transaction over `col_ids`, waiting up to `timeout`.
    ///
    /// # Errors
    /// - `LockTimeout` if another transaction keeps one of the collections,
    ///   or a checkpoint keeps the file
    /// - `InvalidState` for collection id 0
    pub fn begin_transaction_with_timeout(
        &self,
        col_ids: &[u8],
        timeout: Duration,
    ) -> Result<Transaction<'_>> {
        if col_ids.contains(&0) {
            return Err(Error::InvalidState("collection id 0 is reserved"));
        }
        let lock = self.locks.enter_transaction(col_ids, timeout)?;
        Ok(Transaction::new(self, lock))
    }

    /// Copy every committed page from the log into the data file.
    ///
    /// Waits for all open transactions to finish. Returns the number of
    /// pages moved.
    pub fn checkpoint(&self) -> Result<usize> {
        let _exclusive = self.locks.enter_exclusive(self.settings.lock_timeout)?;
        self.checkpoint_exclusive()
    }

    fn checkpoint_exclusive(&self) -> Result<usize> {
        assert_eq!(self.cache.total_shares(), 0, "checkpoint with rented pages");

        let mut disk = self.disk.lock();
        let moved = self.log.checkpoint(&mut disk)?;

        // Claimed extents exist on disk, even pages never written.
        let last = self.alloc.last_page_id().0;
        if disk.page_count() <= last {
            let from = disk.page_count();
            disk.write_empty_pages(from, last)?;
        }
        self.alloc.persist(&mut disk)?;
        disk.flush()?;
        self.log.clear()?;
        Ok(moved.len())
    }

    /// Checkpoint and close the files.
    pub fn shutdown(self) -> Result<()> {
        {
            let _exclusive = self.locks.enter_exclusive(self.settings.lock_timeout)?;
            let moved = self.checkpoint_exclusive()?;
            info!(
                "closed {} ({} page(s) checkpointed)",
                self.settings.filename.display(),
                moved
            );
        }
        Ok(())
    }

    // ========================================================================
    // Page loading
    // ========================================================================

    /// Fill `page` with the latest committed version of `page_id`.
    pub(crate) fn load_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        if self.log.read_latest(page_id, page)? {
            return Ok(());
        }
        self.disk.lock().read_page(page_id.0, page)
    }

    /// Rent the latest committed version of `page_id` from the cache.
    pub(crate) fn rent_page(&self, page_id: PageId) -> Result<SharedPage<'_>> {
        if MapLocation::of(page_id).is_none() {
            return Err(Error::InvalidState("allocation-map pages are not transactional"));
        }
        self.cache.rent(page_id, |page| self.load_page(page_id, page))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn cache_stats(&self) -> StatsSnapshot {
        self.cache.stats().snapshot()
    }

    /// Bucket sizes of one collection in the allocation map.
    pub fn free_pages(&self, col_id: u8) -> FreePagesSummary {
        self.alloc.free_pages(col_id)
    }

    /// Owner and class of `page_id` as recorded in the allocation map.
    pub fn page_class(&self, page_id: PageId) -> Option<(u8, PageClass)> {
        self.alloc.class_of(page_id)
    }

    /// Header and slot table of the latest committed version of `page_id`.
    ///
    /// Takes no lock: the result may interleave with running commits.
    pub fn dump_page(&self, page_id: PageId) -> Result<PageDump> {
        let page = if MapLocation::of(page_id).is_none() {
            self.alloc
                .map_page(page_id)
                .ok_or(Error::PageNotFound(page_id.0))?
        } else {
            let mut page = Box::new(Page::new());
            self.load_page(page_id, &mut page)?;
            page
        };
        Ok(PageDump {
            page,
            class: self.alloc.class_of(page_id),
        })
    }

    /// Counters of every service. Takes no lock.
    pub fn dump_state(&self) -> EngineDump {
        let (data_pages, encrypted) = {
            let disk = self.disk.lock();
            (disk.page_count(), disk.is_encrypted())
        };
        EngineDump {
            filename: self.settings.filename.clone(),
            encrypted,
            data_pages,
            log_positions: self.log.position_count(),
            log_confirmed_pages: self.log.confirmed_pages(),
            cache_resident: self.cache.resident_count(),
            cache_max_pages: self.cache.max_pages(),
            cache_shared: self.cache.shared_count(),
            cache_shares: self.cache.total_shares(),
            pool_free: self.cache.pool().free_count(),
            pool_allocated: self.cache.pool().allocated_count(),
            stats: self.cache.stats().snapshot(),
            version: self.monitor.version(),
            active_transactions: self.monitor.active_ids(),
            locks: self.locks.snapshot(),
            map_pages: self.alloc.map_page_count(),
            last_page_id: self.alloc.last_page_id(),
        }
    }
}
