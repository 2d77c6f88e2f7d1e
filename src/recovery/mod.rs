//! Write-ahead logging, checkpoint and crash recovery.
//!
//! Committed pages never go straight to the data file. They are appended to
//! the log, fsynced, and copied home by a checkpoint under the exclusive
//! file lock. On open, the log is scanned and every confirmed image is
//! replayed before the engine accepts transactions.

mod log_position;
mod log_service;

pub use log_position::LogPosition;
pub use log_service::LogService;
