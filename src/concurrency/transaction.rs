//! Transaction - a private working set of pages over the shared cache.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use log::debug;

use crate::allocation::MapUpdate;
use crate::common::{Error, PageId, Result};
use crate::engine::Engine;
use crate::storage::page::{Page, PageType};

use super::TransactionLock;

/// A unit of work over a fixed set of collections.
///
/// # Page Lifecycle
/// ```text
/// read_page ─► dirty copy? ─► safepointed image? ─► shared cache
/// page_mut  ─► copy into `dirty` (first write only)
/// safepoint ─► dirty pages to the log, unconfirmed; `dirty` emptied
/// commit    ─► remaining pages to the log, confirmed; cache installs;
///              allocation map updated
/// rollback  ─► dirty pages dropped; checked-out pages back to buckets
/// ```
///
/// Cached pages are never written in place. Concurrent readers of other
/// collections keep seeing the committed versions until commit installs
/// the new ones.
///
/// Dropping an active transaction rolls it back. Locks are released after
/// the rollback or commit has finished.
pub struct Transaction<'a> {
    engine: &'a Engine,
    id: u32,
    read_version: u64,
    done: bool,
    dirty: HashMap<PageId, Box<Page>>,
    /// Pages taken out of the allocation-map buckets.
    checked_out: Vec<PageId>,
    /// Page id to log position of its latest unconfirmed image.
    safepointed: HashMap<PageId, u32>,
    lock: TransactionLock<'a>,
}

/// Copy of the newest version of `page_id` visible to a transaction that
/// has no dirty copy of it.
fn load_copy(engine: &Engine, safepointed: &HashMap<PageId, u32>, page_id: PageId) -> Result<Box<Page>> {
    let mut page = Box::new(Page::new());
    match safepointed.get(&page_id) {
        Some(&position) => engine.log.read_position(position, &mut page)?,
        None => page.copy_from(&*engine.rent_page(page_id)?),
    }
    Ok(page)
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(engine: &'a Engine, lock: TransactionLock<'a>) -> Self {
        let (id, read_version) = engine.monitor.begin();
        debug!("transaction {} started on collections {:?}", id, lock.col_ids());
        Self {
            engine,
            id,
            read_version,
            done: false,
            dirty: HashMap::new(),
            checked_out: Vec::new(),
            safepointed: HashMap::new(),
            lock,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Commit count of the engine when this transaction started.
    #[inline]
    pub fn read_version(&self) -> u64 {
        self.read_version
    }

    /// Locked collections, sorted.
    pub fn col_ids(&self) -> &[u8] {
        self.lock.col_ids()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn safepointed_count(&self) -> usize {
        self.safepointed.len()
    }

    pub fn checked_out(&self) -> &[PageId] {
        &self.checked_out
    }

    // ========================================================================
    // Page access
    // ========================================================================

    /// Run `f` over the version of `page_id` this transaction sees.
    pub fn read_page<R>(&self, page_id: PageId, f: impl FnOnce(&Page) -> R) -> Result<R> {
        if let Some(page) = self.dirty.get(&page_id) {
            return Ok(f(page));
        }
        if self.safepointed.contains_key(&page_id) {
            let page = load_copy(self.engine, &self.safepointed, page_id)?;
            return Ok(f(&page));
        }
        let shared = self.engine.rent_page(page_id)?;
        Ok(f(&shared))
    }

    /// Writable copy of `page_id`, private to this transaction.
    pub fn page_mut(&mut self, page_id: PageId) -> Result<&mut Page> {
        let page = match self.dirty.entry(page_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let page = load_copy(self.engine, &self.safepointed, page_id)?;
                entry.insert(page)
            }
        };
        Ok(&mut **page)
    }

    /// A page of `page_type` in `col_id` with at least `length` free bytes.
    ///
    /// Pages this transaction already took from the allocation map are
    /// reused first. The page is dirty on return.
    ///
    /// # Errors
    /// `InvalidState` if `col_id` is not locked by this transaction, or
    /// `page_type` is neither data nor index.
    pub fn get_free_page(&mut self, col_id: u8, page_type: PageType, length: usize) -> Result<PageId> {
        if !self.col_ids().contains(&col_id) {
            return Err(Error::InvalidState("collection is not locked by this transaction"));
        }
        if !matches!(page_type, PageType::Data | PageType::Index) {
            return Err(Error::InvalidState("only data and index pages are allocated"));
        }

        let reusable = self.checked_out.iter().copied().find(|page_id| {
            self.dirty.get(page_id).is_some_and(|page| {
                page.page_type() == page_type && page.col_id() == col_id && page.free_bytes() >= length
            })
        });
        if let Some(page_id) = reusable {
            return Ok(page_id);
        }

        loop {
            let (page_id, is_new) = self.engine.alloc.get_free_page_id(col_id, page_type, length);
            self.checked_out.push(page_id);

            if is_new {
                let mut page = Box::new(Page::new());
                page.format(page_id, page_type, col_id);
                self.dirty.insert(page_id, page);
                return Ok(page_id);
            }

            // The recorded class is stale if this transaction already filled
            // the page; keep it and ask again.
            if self.page_mut(page_id)?.free_bytes() >= length {
                return Ok(page_id);
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Move the dirty working set to the log, unconfirmed.
    ///
    /// The transaction stays open and keeps its locks; the pages are read
    /// back from the log when needed again.
    pub fn safepoint(&mut self) -> Result<()> {
        if self.dirty.is_empty() {
            return Ok(());
        }

        let mut pages: Vec<Box<Page>> = self.dirty.drain().map(|(_, page)| page).collect();
        pages.sort_by_key(|page| page.page_id());

        match self.engine.log.write_pages(self.id, &mut pages, false) {
            Ok(positions) => {
                for position in positions {
                    self.safepointed.insert(position.page_id, position.position_id);
                }
                debug!("transaction {} safepointed {} page(s)", self.id, pages.len());
                Ok(())
            }
            Err(e) => {
                for page in pages {
                    self.dirty.insert(page.page_id(), page);
                }
                Err(e)
            }
        }
    }

    /// Make every change durable and visible, then release the locks.
    ///
    /// Everything that can fail happens before the confirmed append. An
    /// error up to that point rolls the transaction back; once the append
    /// succeeds the commit completes.
    pub fn commit(mut self) -> Result<()> {
        let engine = self.engine;

        let mut pages: Vec<Box<Page>> = self.dirty.drain().map(|(_, page)| page).collect();
        pages.sort_by_key(|page| page.page_id());
        let written: HashSet<PageId> = pages.iter().map(|page| page.page_id()).collect();

        // Pages that only live in the log still need a confirmed image.
        let mut logged_ids: Vec<PageId> = self
            .safepointed
            .keys()
            .copied()
            .filter(|page_id| !written.contains(page_id))
            .collect();
        logged_ids.sort_unstable();
        let mut logged = Vec::with_capacity(logged_ids.len());
        for page_id in logged_ids {
            logged.push(load_copy(engine, &self.safepointed, page_id)?);
        }
        if pages.is_empty() {
            if let Some(page) = logged.pop() {
                pages.push(page);
            }
        }

        if !pages.is_empty() {
            engine.log.write_pages(self.id, &mut pages, true)?;
        }
        self.done = true;

        let mut updates = Vec::with_capacity(pages.len() + logged.len());
        for page in pages.iter().chain(logged.iter()) {
            engine.cache.install(page.page_id(), page);
            updates.push(MapUpdate::of(page));
        }
        engine.alloc.update_map(&updates);

        let version = engine.monitor.commit();
        engine.monitor.finish(self.id);
        debug!(
            "transaction {} committed {} page(s) at version {}",
            self.id,
            updates.len(),
            version
        );
        Ok(())
    }

    /// Discard every change and release the locks.
    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        let discarded = self.dirty.len() + self.safepointed.len();
        self.dirty.clear();
        self.safepointed.clear();
        self.engine.log.discard(self.id);
        self.engine.alloc.restore_pages(&self.checked_out);
        self.engine.monitor.finish(self.id);
        debug!(
            "transaction {} rolled back, {} page(s) discarded",
            self.id, discarded
        );
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.abort();
    }
}
