//! Lock Service - collection claims under a shared file lock, and the
//! exclusive file lock used by checkpoint and shutdown.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use log::warn;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::{Error, Result};

/// Coordinates transactions with each other and with checkpoint.
///
/// # Lock Model
/// ```text
/// file lock:    shared (every transaction)  |  exclusive (checkpoint, shutdown)
/// collections:  one FIFO ticket queue per col id; the front ticket owns it
/// ```
///
/// A transaction takes its tickets for all of its collections in one step,
/// so any two transactions are ordered the same way in every queue they
/// share and can never wait on each other in a cycle.
///
/// A waiting exclusive request blocks new shared acquisitions, so a steady
/// stream of transactions cannot starve a checkpoint.
///
/// # Thread Safety
/// All state sits behind one `Mutex`; waiters park on a single `Condvar`
/// that is notified on every release.
pub struct LockService {
    state: Mutex<LockState>,
    changed: Condvar,
}

#[derive(Default)]
struct LockState {
    /// Transactions holding the shared file lock.
    readers: usize,
    exclusive: bool,
    exclusive_waiters: usize,
    next_ticket: u64,
    queues: HashMap<u8, VecDeque<u64>>,
}

impl LockState {
    fn owns_all(&self, ticket: u64, col_ids: &[u8]) -> bool {
        col_ids
            .iter()
            .all(|col| self.queues.get(col).and_then(|q| q.front()) == Some(&ticket))
    }

    fn leave_queues(&mut self, ticket: u64, col_ids: &[u8]) {
        for col in col_ids {
            if let Some(queue) = self.queues.get_mut(col) {
                queue.retain(|&t| t != ticket);
                if queue.is_empty() {
                    self.queues.remove(col);
                }
            }
        }
    }
}

/// Snapshot of the lock table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockSnapshot {
    pub readers: usize,
    pub exclusive: bool,
    pub exclusive_waiters: usize,
    /// Collections with at least one owner or waiter.
    pub collections: usize,
}

impl LockService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
        }
    }

    /// Wait on the condvar until `blocked` is false or `deadline` passes.
    ///
    /// Returns `false` on timeout.
    fn wait_while(
        &self,
        state: &mut MutexGuard<'_, LockState>,
        deadline: Instant,
        blocked: impl Fn(&LockState) -> bool,
    ) -> bool {
        while blocked(state) {
            if self.changed.wait_until(state, deadline).timed_out() {
                return !blocked(state);
            }
        }
        true
    }

    /// Take the shared file lock and claim every collection in `col_ids`.
    ///
    /// # Errors
    /// `LockTimeout` if either step is not granted within `timeout`. Nothing
    /// is held in that case.
    pub fn enter_transaction(&self, col_ids: &[u8], timeout: Duration) -> Result<TransactionLock<'_>> {
        let deadline = Instant::now() + timeout;
        let mut col_ids = col_ids.to_vec();
        col_ids.sort_unstable();
        col_ids.dedup();

        let mut state = self.state.lock();
        if !self.wait_while(&mut state, deadline, |s| s.exclusive || s.exclusive_waiters > 0) {
            warn!("shared file lock not granted within {:?}", timeout);
            return Err(Error::LockTimeout(timeout));
        }
        state.readers += 1;

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        for &col in &col_ids {
            state.queues.entry(col).or_default().push_back(ticket);
        }

        if !self.wait_while(&mut state, deadline, |s| !s.owns_all(ticket, &col_ids)) {
            state.leave_queues(ticket, &col_ids);
            state.readers -= 1;
            drop(state);
            self.changed.notify_all();
            warn!("collections {:?} not granted within {:?}", col_ids, timeout);
            return Err(Error::LockTimeout(timeout));
        }

        Ok(TransactionLock {
            locks: self,
            ticket,
            col_ids,
        })
    }

    fn exit_transaction(&self, ticket: u64, col_ids: &[u8]) {
        let mut state = self.state.lock();
        for col in col_ids {
            let front = state.queues.get(col).and_then(|q| q.front()).copied();
            assert_eq!(front, Some(ticket), "collection {} released by a non-owner", col);
        }
        state.leave_queues(ticket, col_ids);
        state.readers -= 1;
        drop(state);
        self.changed.notify_all();
    }

    /// Take the exclusive file lock once every transaction has left.
    ///
    /// # Errors
    /// `LockTimeout` if transactions are still active after `timeout`.
    pub fn enter_exclusive(&self, timeout: Duration) -> Result<ExclusiveLock<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        state.exclusive_waiters += 1;
        let granted = self.wait_while(&mut state, deadline, |s| s.exclusive || s.readers > 0);
        state.exclusive_waiters -= 1;

        if !granted {
            drop(state);
            self.changed.notify_all();
            warn!("exclusive file lock not granted within {:?}", timeout);
            return Err(Error::LockTimeout(timeout));
        }
        state.exclusive = true;
        Ok(ExclusiveLock { locks: self })
    }

    fn exit_exclusive(&self) {
        let mut state = self.state.lock();
        assert!(state.exclusive, "exclusive lock released twice");
        state.exclusive = false;
        drop(state);
        self.changed.notify_all();
    }

    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.lock();
        LockSnapshot {
            readers: state.readers,
            exclusive: state.exclusive,
            exclusive_waiters: state.exclusive_waiters,
            collections: state.queues.len(),
        }
    }
}

impl Default for LockService {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared file lock plus collection claims, released on drop.
pub struct TransactionLock<'a> {
    locks: &'a LockService,
    ticket: u64,
    col_ids: Vec<u8>,
}

impl TransactionLock<'_> {
    /// Claimed collections, sorted.
    pub fn col_ids(&self) -> &[u8] {
        &self.col_ids
    }
}

impl Drop for TransactionLock<'_> {
    fn drop(&mut self) {
        self.locks.exit_transaction(self.ticket, &self.col_ids);
    }
}

/// Exclusive file lock, released on drop.
pub struct ExclusiveLock<'a> {
    locks: &'a LockService,
}

impl Drop for ExclusiveLock<'_> {
    fn drop(&mut self) {
        self.locks.exit_exclusive();
    }
}
