//! Document payload storage.

mod data_service;

pub use data_service::{DataBlock, DataService};
