//! Index structures.
//!
//! Every index is a skip list stored in index pages of its collection:
//! - [`IndexService`] - add, find, delete and scan
//! - [`IndexNode`] - node layout inside a page segment
//! - [`IndexKey`] / [`Collation`] - keys and their ordering

mod index_node;
mod index_service;
mod key;

pub use index_node::IndexNode;
pub use index_service::{IndexInfo, IndexScan, IndexService, Order};
pub use key::{BinaryCollation, Collation, IndexKey};
