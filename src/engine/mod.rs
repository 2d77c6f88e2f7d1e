//! Engine facade: open, transactions, checkpoint, shutdown and dumps.

mod dump;
#[allow(clippy::module_inception)]
mod engine;

pub use dump::{EngineDump, PageDump};
pub use engine::Engine;
