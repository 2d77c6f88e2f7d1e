//! QuillStore - an embedded document storage kernel.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          QuillStore                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Engine Facade (engine/)                  │   │
//! │  │     open · begin_transaction · checkpoint · shutdown     │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │        Index (index/) · Data (data/)                     │   │
//! │  │   skip lists and chained data blocks over page slots     │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Transaction Layer (concurrency/)               │   │
//! │  │   LockService + TransactionMonitor + Transaction         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌──────────────────────────┐  ┌───────────────────────────┐   │
//! │  │ Allocation (allocation/) │  │ Log & Recovery (recovery/)│   │
//! │  │ extents · 3-bit classes  │  │ WAL · checkpoint · replay │   │
//! │  └──────────────────────────┘  └───────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Page Cache (buffer/)                           │   │
//! │  │   PageCache + PagePool + LRU replacer + statistics       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage Layer (storage/)                       │   │
//! │  │   DiskStream + FileHeader + PageCipher + Page            │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, PageAddress, Error, config)
//! - [`storage`] - Disk I/O, file header, encryption and page format
//! - [`buffer`] - Shared page cache and buffer pool
//! - [`allocation`] - Per-collection free-space map
//! - [`recovery`] - Write-ahead log, checkpoint and crash recovery
//! - [`concurrency`] - Locks and transactions
//! - [`index`] - Skip-list indexes
//! - [`data`] - Document payload blocks
//! - [`engine`] - The engine facade
//!
//! # Quick Start
//! ```no_run
//! use std::sync::Arc;
//! use quillstore::{BinaryCollation, Engine, EngineSettings, IndexKey, IndexService, Order};
//! use quillstore::data::DataService;
//!
//! let engine = Engine::open(EngineSettings::new("my_database.qdb")).unwrap();
//! let indexes = IndexService::new(Arc::new(BinaryCollation));
//! let data = DataService::new();
//!
//! let mut tx = engine.begin_transaction(&[1]).unwrap();
//! let index = indexes.create_head_tail_nodes(&mut tx, 1, 0, true).unwrap();
//! let doc = data.insert(&mut tx, 1, b"hello").unwrap();
//! indexes.add_node(&mut tx, &index, IndexKey::value(b"k1".to_vec()), doc, None).unwrap();
//! tx.commit().unwrap();
//!
//! let tx = engine.begin_transaction(&[1]).unwrap();
//! let node = indexes
//!     .find(&tx, &index, &IndexKey::value(b"k1".to_vec()), false, Order::Ascending)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(data.read(&tx, node.data_block).unwrap(), b"hello");
//! ```

pub mod allocation;
pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod data;
pub mod engine;
pub mod index;
pub mod recovery;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::{EngineSettings, PAGE_SIZE};
pub use common::{Error, PageAddress, PageId, Result};

pub use buffer::{CacheStats, PageCache, SharedPage, StatsSnapshot};
pub use concurrency::Transaction;
pub use engine::{Engine, EngineDump, PageDump};
pub use index::{BinaryCollation, Collation, IndexInfo, IndexKey, IndexNode, IndexService, Order};
pub use storage::page::{Page, PageHeader, PageType};
pub use storage::DiskStream;
