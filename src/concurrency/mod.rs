//! Lock and transaction coordination.
//!
//! - [`LockService`] - shared/exclusive file lock and per-collection claims
//! - [`TransactionMonitor`] - transaction ids and read versions
//! - [`Transaction`] - private dirty working set, commit and rollback

mod lock_service;
mod monitor;
mod transaction;

pub use lock_service::{ExclusiveLock, LockService, LockSnapshot, TransactionLock};
pub use monitor::TransactionMonitor;
pub use transaction::Transaction;
