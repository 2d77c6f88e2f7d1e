//! Transaction ids, read versions and the set of open transactions.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Hands out transaction ids and tracks which transactions are open.
///
/// Ids start at 1 for every engine instance; the log is always empty when
/// an engine starts accepting transactions, so ids never collide with
/// images from a previous run.
pub struct TransactionMonitor {
    next_id: AtomicU32,
    /// Bumped by every commit; a new transaction reads at this version.
    version: AtomicU64,
    active: Mutex<BTreeSet<u32>>,
}

impl TransactionMonitor {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            version: AtomicU64::new(0),
            active: Mutex::new(BTreeSet::new()),
        }
    }

    /// Register a new transaction. Returns its id and read version.
    pub fn begin(&self) -> (u32, u64) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.lock().insert(id);
        (id, self.version.load(Ordering::Acquire))
    }

    /// Record a commit. Returns the new version.
    pub fn commit(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn finish(&self, id: u32) {
        self.active.lock().remove(&id);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Ids of open transactions, ascending.
    pub fn active_ids(&self) -> Vec<u32> {
        self.active.lock().iter().copied().collect()
    }
}

impl Default for TransactionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_and_versions() {
        let monitor = TransactionMonitor::new();
        let (a, va) = monitor.begin();
        assert_eq!((a, va), (1, 0));

        assert_eq!(monitor.commit(), 1);
        monitor.finish(a);

        let (b, vb) = monitor.begin();
        assert_eq!((b, vb), (2, 1));
        assert_eq!(monitor.active_ids(), vec![2]);
    }
}
