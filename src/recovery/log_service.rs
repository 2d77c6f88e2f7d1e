//! Write-ahead log - durable staging of committed page images.

use std::collections::HashMap;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::allocation::{MapLocation, MapUpdate};
use crate::common::{PageId, Result};
use crate::storage::page::Page;
use crate::storage::{DiskStream, PageState};

use super::LogPosition;

/// Appends page images to the `-log` companion file and replays them into
/// the data file at checkpoint.
///
/// # Log Format
/// The log is a [`DiskStream`] of kind `Log`: same header, same cipher, one
/// page image per position. Each image carries the writing transaction's id
/// in its header; the last image of a commit also carries the confirmed
/// flag. Images of a transaction become visible only once a confirmed image
/// with the same id has been written.
///
/// Images held in memory (cache, data file) always have both transaction
/// fields cleared.
///
/// # Thread Safety
/// One mutex over the stream and the position tables. Positions are only
/// consumed once an append succeeded, so a failed append leaves no gap.
pub struct LogService {
    inner: Mutex<LogInner>,
}

struct LogInner {
    disk: DiskStream,
    next_position: u32,
    /// Latest confirmed image of every page.
    confirmed: HashMap<PageId, LogPosition>,
    /// Images of transactions that have not confirmed yet.
    pending: HashMap<u32, Vec<LogPosition>>,
    confirmed_transactions: u64,
}

impl LogInner {
    fn confirm(&mut self, transaction_id: u32) {
        if let Some(positions) = self.pending.remove(&transaction_id) {
            for mut position in positions {
                position.confirmed = true;
                self.confirmed.insert(position.page_id, position);
            }
        }
        self.confirmed_transactions += 1;
    }
}

/// Clear the transaction stamp and re-seal the checksum.
fn normalize(page: &mut Page) {
    page.set_transaction(0, false);
    page.update_checksum();
}

impl LogService {
    /// Wrap an open log stream. Call [`recover`](Self::recover) before use.
    pub fn new(disk: DiskStream) -> Self {
        let next_position = disk.page_count();
        Self {
            inner: Mutex::new(LogInner {
                disk,
                next_position,
                confirmed: HashMap::new(),
                pending: HashMap::new(),
                confirmed_transactions: 0,
            }),
        }
    }

    /// Rebuild the position tables from the log file.
    ///
    /// The scan stops at the first torn or blank image; everything after it
    /// is overwritten by later appends. Images of transactions that never
    /// confirmed are dropped.
    ///
    /// Returns the number of pages with a confirmed image.
    pub fn recover(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.confirmed.clear();
        inner.pending.clear();

        let mut page = Page::new();
        let mut position = 0;
        while position < inner.disk.page_count() {
            match inner.disk.load_page(position, &mut page)? {
                PageState::Valid => {}
                state => {
                    warn!("log scan stopped at position {} ({:?})", position, state);
                    break;
                }
            }

            let transaction_id = page.transaction_id();
            inner
                .pending
                .entry(transaction_id)
                .or_default()
                .push(LogPosition::new(position, page.page_id()));
            if page.is_confirmed() {
                inner.confirm(transaction_id);
            }
            position += 1;
        }
        inner.next_position = position;

        let dropped: usize = inner.pending.values().map(Vec::len).sum();
        if dropped > 0 {
            debug!(
                "ignoring {} unconfirmed log image(s) from {} transaction(s)",
                dropped,
                inner.pending.len()
            );
        }
        inner.pending.clear();

        Ok(inner.confirmed.len())
    }

    /// Append `pages` for `transaction_id`.
    ///
    /// With `confirm`, the last image carries the confirmed flag and the log
    /// is fsynced before returning: the transaction is then durable.
    pub fn write_pages(
        &self,
        transaction_id: u32,
        pages: &mut [Box<Page>],
        confirm: bool,
    ) -> Result<Vec<LogPosition>> {
        let mut inner = self.inner.lock();
        let start = inner.next_position;
        let count = pages.len();

        let mut positions = Vec::with_capacity(count);
        for (i, page) in pages.iter_mut().enumerate() {
            let position = start + i as u32;
            page.set_transaction(transaction_id, confirm && i + 1 == count);
            let written = inner.disk.write_page(position, page);
            normalize(page);
            written?;
            positions.push(LogPosition::new(position, page.page_id()));
        }
        if confirm {
            inner.disk.flush()?;
        }

        inner.next_position = start + count as u32;
        inner
            .pending
            .entry(transaction_id)
            .or_default()
            .extend(positions.iter().copied());
        if confirm {
            inner.confirm(transaction_id);
        }

        debug!(
            "transaction {} wrote {} image(s) at log {}{}",
            transaction_id,
            count,
            start,
            if confirm { " (confirmed)" } else { "" }
        );
        Ok(positions)
    }

    /// Forget the unconfirmed images of `transaction_id`.
    pub fn discard(&self, transaction_id: u32) {
        self.inner.lock().pending.remove(&transaction_id);
    }

    /// Read the image at `position`.
    pub fn read_position(&self, position: u32, page: &mut Page) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.disk.read_page(position, page)?;
        normalize(page);
        Ok(())
    }

    /// Read the latest confirmed image of `page_id`, if the log has one.
    pub fn read_latest(&self, page_id: PageId, page: &mut Page) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(position) = inner.confirmed.get(&page_id).copied() else {
            return Ok(false);
        };
        inner.disk.read_page(position.position_id, page)?;
        normalize(page);
        Ok(true)
    }

    /// Latest confirmed position of `page_id`.
    pub fn latest(&self, page_id: PageId) -> Option<LogPosition> {
        self.inner.lock().confirmed.get(&page_id).copied()
    }

    /// Copy the latest confirmed image of every page to its home position
    /// in `data` and fsync it.
    ///
    /// The log itself is left intact; call [`clear`](Self::clear) once the
    /// allocation map is persisted too. Running this twice writes the same
    /// bytes twice.
    ///
    /// Returns the map update of every page moved.
    pub fn checkpoint(&self, data: &mut DiskStream) -> Result<Vec<MapUpdate>> {
        let mut inner = self.inner.lock();

        let mut positions: Vec<LogPosition> = inner.confirmed.values().copied().collect();
        positions.sort_by_key(|p| p.physical_id);

        let mut page = Page::new();
        let mut updates = Vec::with_capacity(positions.len());
        for position in &positions {
            inner.disk.read_page(position.position_id, &mut page)?;
            normalize(&mut page);
            data.write_page(position.physical_id, &page)?;
            if MapLocation::of(position.page_id).is_some() {
                updates.push(MapUpdate::of(&page));
            }
        }
        data.flush()?;

        info!(
            "checkpoint copied {} page(s) from {} log position(s)",
            positions.len(),
            inner.next_position
        );
        Ok(updates)
    }

    /// Truncate the log to its header.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.disk.set_size(0)?;
        inner.disk.flush()?;
        inner.next_position = 0;
        inner.confirmed.clear();
        inner.pending.clear();
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Positions written since the last clear.
    pub fn position_count(&self) -> u32 {
        self.inner.lock().next_position
    }

    /// Pages with a confirmed image waiting for checkpoint.
    pub fn confirmed_pages(&self) -> usize {
        self.inner.lock().confirmed.len()
    }

    /// Transactions with unconfirmed images.
    pub fn pending_transactions(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Transactions confirmed since the service was created.
    pub fn confirmed_transactions(&self) -> u64 {
        self.inner.lock().confirmed_transactions
    }

    /// Size of the log file in bytes.
    pub fn file_size(&self) -> u64 {
        self.inner.lock().disk.file_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageType;
    use crate::storage::FileKind;
    use tempfile::{tempdir, TempDir};

    fn open_log(dir: &TempDir) -> LogService {
        let path = dir.path().join("test.qdb-log");
        LogService::new(DiskStream::open_or_create(&path, FileKind::Log, None, 0).unwrap())
    }

    fn image(id: u32, byte: u8) -> Box<Page> {
        let mut page = Box::new(Page::new());
        page.format(PageId(id), PageType::Data, 1);
        page.insert(16).1.fill(byte);
        page
    }

    #[test]
    fn test_confirmed_images_are_visible() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);

        let mut pages = vec![image(1, 0xA1), image(2, 0xA2)];
        let positions = log.write_pages(7, &mut pages, true).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[1].position_id, 1);

        // Stamp is cleared on the caller's copy.
        assert_eq!(pages[1].transaction_id(), 0);
        assert!(!pages[1].is_confirmed());

        let mut page = Page::new();
        assert!(log.read_latest(PageId(2), &mut page).unwrap());
        assert_eq!(page.get(0), &[0xA2; 16][..]);
        assert_eq!(page.transaction_id(), 0);
        assert!(!log.read_latest(PageId(3), &mut page).unwrap());
    }

    #[test]
    fn test_unconfirmed_images_stay_hidden() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);

        log.write_pages(3, &mut [image(1, 1)], false).unwrap();
        assert_eq!(log.latest(PageId(1)), None);
        assert_eq!(log.pending_transactions(), 1);

        log.write_pages(3, &mut [image(2, 2)], true).unwrap();
        assert!(log.latest(PageId(1)).is_some());
        assert!(log.latest(PageId(2)).unwrap().confirmed);
        assert_eq!(log.pending_transactions(), 0);
    }

    #[test]
    fn test_later_commit_wins() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);

        log.write_pages(1, &mut [image(4, 1)], true).unwrap();
        log.write_pages(2, &mut [image(4, 2)], true).unwrap();

        assert_eq!(log.latest(PageId(4)).unwrap().position_id, 1);
        assert_eq!(log.confirmed_pages(), 1);
        assert_eq!(log.confirmed_transactions(), 2);
    }

    #[test]
    fn test_recover_drops_unconfirmed_tail() {
        let dir = tempdir().unwrap();
        {
            let log = open_log(&dir);
            log.write_pages(1, &mut [image(1, 1), image(2, 2)], true).unwrap();
            log.write_pages(2, &mut [image(3, 3)], false).unwrap();
        }

        let log = open_log(&dir);
        assert_eq!(log.recover().unwrap(), 2);
        assert!(log.latest(PageId(3)).is_none());
        assert_eq!(log.position_count(), 3);
    }

    #[test]
    fn test_recover_stops_at_torn_image() {
        use std::io::{Seek, SeekFrom, Write};
        use crate::common::config::{FILE_HEADER_SIZE, PAGE_SIZE};

        let dir = tempdir().unwrap();
        {
            let log = open_log(&dir);
            log.write_pages(1, &mut [image(1, 1)], true).unwrap();
            log.write_pages(2, &mut [image(2, 2)], true).unwrap();
            log.write_pages(3, &mut [image(3, 3)], true).unwrap();
        }
        {
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .open(dir.path().join("test.qdb-log"))
                .unwrap();
            let offset = FILE_HEADER_SIZE + PAGE_SIZE + 200;
            file.seek(SeekFrom::Start(offset as u64)).unwrap();
            file.write_all(&[0xFF; 8]).unwrap();
        }

        let log = open_log(&dir);
        assert_eq!(log.recover().unwrap(), 1);
        assert!(log.latest(PageId(1)).is_some());
        assert!(log.latest(PageId(2)).is_none());
        assert!(log.latest(PageId(3)).is_none());
    }

    #[test]
    fn test_checkpoint_and_clear() {
        let dir = tempdir().unwrap();
        let log = open_log(&dir);
        let mut data =
            DiskStream::create(dir.path().join("test.qdb"), FileKind::Data, None, 0).unwrap();

        log.write_pages(1, &mut [image(1, 1), image(2, 2)], true).unwrap();
        log.write_pages(2, &mut [image(1, 9)], true).unwrap();

        let updates = log.checkpoint(&mut data).unwrap();
        assert_eq!(updates.len(), 2);
        // Idempotent while the log is intact.
        assert_eq!(log.checkpoint(&mut data).unwrap().len(), 2);

        let mut page = Page::new();
        data.read_page(1, &mut page).unwrap();
        assert_eq!(page.get(0), &[9; 16][..]);

        log.clear().unwrap();
        assert_eq!(log.position_count(), 0);
        assert_eq!(log.confirmed_pages(), 0);
        assert!(log.checkpoint(&mut data).unwrap().is_empty());
    }
}
