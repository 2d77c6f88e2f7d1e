//! Integration tests for locking, transaction lifecycle and data blocks.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::thread;
use std::time::{Duration, Instant};

use quillstore::allocation::PageClass;
use quillstore::common::config::FILE_HEADER_SIZE;
use quillstore::data::{DataBlock, DataService};
use quillstore::storage::page::PageType;
use quillstore::{Engine, EngineSettings, Error, PageId};
use tempfile::{tempdir, TempDir};

fn open_engine() -> (Engine, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let settings = EngineSettings::new(dir.path().join("tx.qdb")).lock_timeout(Duration::from_secs(10));
    (Engine::open(settings).unwrap(), dir)
}

/// Spin until `check` holds or a second has passed.
fn wait_for(check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(1);
    while !check() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_disjoint_collections_and_checkpoint() {
    let (engine, _dir) = open_engine();
    let data = DataService::new();

    let mut tx1 = engine.begin_transaction(&[1]).unwrap();
    let mut tx2 = engine
        .begin_transaction_with_timeout(&[2], Duration::from_millis(50))
        .unwrap();
    let a = data.insert(&mut tx1, 1, b"first").unwrap();
    let b = data.insert(&mut tx2, 2, b"second").unwrap();
    assert_ne!(a.page_id, b.page_id);
    assert_eq!(engine.dump_state().locks.readers, 2);

    thread::scope(|s| {
        let checkpoint = s.spawn(|| engine.checkpoint());
        wait_for(|| engine.dump_state().locks.exclusive_waiters == 1);
        assert!(!checkpoint.is_finished());

        tx1.commit().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!checkpoint.is_finished());

        tx2.rollback();
        assert_eq!(checkpoint.join().unwrap().unwrap(), 1);
    });

    let state = engine.dump_state();
    assert_eq!(state.locks.readers, 0);
    assert!(!state.locks.exclusive);
    assert_eq!(state.log_positions, 0);
}

#[test]
fn test_same_collection_times_out() {
    let (engine, _dir) = open_engine();

    let tx = engine.begin_transaction(&[1, 2]).unwrap();
    let err = engine
        .begin_transaction_with_timeout(&[2, 3], Duration::from_millis(50))
        .err()
        .unwrap();
    assert!(matches!(err, Error::LockTimeout(_)));
    assert!(err.is_recoverable());

    // A failed acquisition holds nothing.
    let other = engine
        .begin_transaction_with_timeout(&[3], Duration::from_millis(50))
        .unwrap();
    drop(other);

    tx.rollback();
    engine
        .begin_transaction_with_timeout(&[2, 3], Duration::from_millis(50))
        .unwrap();
}

#[test]
fn test_waiting_checkpoint_blocks_new_transactions() {
    let (engine, _dir) = open_engine();
    let tx = engine.begin_transaction(&[1]).unwrap();

    thread::scope(|s| {
        let checkpoint = s.spawn(|| engine.checkpoint());
        wait_for(|| engine.dump_state().locks.exclusive_waiters == 1);

        assert!(matches!(
            engine.begin_transaction_with_timeout(&[5], Duration::from_millis(50)),
            Err(Error::LockTimeout(_))
        ));

        drop(tx);
        assert_eq!(checkpoint.join().unwrap().unwrap(), 0);
    });

    engine.begin_transaction(&[5]).unwrap().commit().unwrap();
}

#[test]
fn test_transaction_ids_and_versions() {
    let (engine, _dir) = open_engine();

    let tx = engine.begin_transaction(&[1]).unwrap();
    assert_eq!(tx.id(), 1);
    assert_eq!(tx.read_version(), 0);
    tx.commit().unwrap();

    let tx = engine.begin_transaction(&[3, 1, 3]).unwrap();
    assert_eq!(tx.id(), 2);
    assert_eq!(tx.read_version(), 1);
    assert_eq!(tx.col_ids(), &[1, 3]);
    assert_eq!(engine.dump_state().active_transactions, vec![2]);
}

#[test]
fn test_safepoint_then_commit() {
    let (engine, _dir) = open_engine();
    let data = DataService::new();

    let mut tx = engine.begin_transaction(&[1]).unwrap();
    let first = data.insert(&mut tx, 1, b"before safepoint").unwrap();
    tx.safepoint().unwrap();
    assert_eq!(tx.dirty_count(), 0);
    assert_eq!(tx.safepointed_count(), 1);

    // Still visible to its own transaction, invisible to everyone else.
    assert_eq!(data.read(&tx, first).unwrap(), b"before safepoint");
    assert_eq!(engine.dump_state().log_confirmed_pages, 0);

    let second = data.insert(&mut tx, 1, b"after safepoint").unwrap();
    tx.commit().unwrap();

    let tx = engine.begin_transaction(&[1]).unwrap();
    assert_eq!(data.read(&tx, first).unwrap(), b"before safepoint");
    assert_eq!(data.read(&tx, second).unwrap(), b"after safepoint");
}

#[test]
fn test_commit_of_safepointed_pages_only() {
    let (engine, _dir) = open_engine();
    let data = DataService::new();

    let mut tx = engine.begin_transaction(&[1]).unwrap();
    let big = data.insert(&mut tx, 1, &vec![3u8; 9_000]).unwrap();
    tx.safepoint().unwrap();
    assert_eq!(tx.safepointed_count(), 3);
    tx.commit().unwrap();

    assert_eq!(engine.dump_state().log_confirmed_pages, 3);
    let tx = engine.begin_transaction(&[1]).unwrap();
    assert_eq!(data.read(&tx, big).unwrap(), vec![3u8; 9_000]);
}

#[test]
fn test_rollback_after_safepoint() {
    let (engine, _dir) = open_engine();
    let data = DataService::new();

    let mut tx = engine.begin_transaction(&[1]).unwrap();
    let address = data.insert(&mut tx, 1, b"discard me").unwrap();
    tx.safepoint().unwrap();
    tx.rollback();

    assert_eq!(engine.free_pages(1).empty, 8);
    assert_eq!(engine.dump_state().log_confirmed_pages, 0);

    // Nothing of the discarded page reached the committed state.
    let tx = engine.begin_transaction(&[1]).unwrap();
    assert!(matches!(
        tx.read_page(address.page_id, |page| page.items_count()),
        Err(Error::PageNotFound(_))
    ));
    assert_eq!(engine.page_class(address.page_id), Some((1, PageClass::Empty)));
}

#[test]
fn test_commit_with_unreadable_log_image_rolls_back() {
    let (engine, dir) = open_engine();
    let data = DataService::new();

    let mut tx = engine.begin_transaction(&[1]).unwrap();
    let logged = data.insert(&mut tx, 1, b"only in the log").unwrap();
    tx.safepoint().unwrap();
    let dirty = data.insert(&mut tx, 1, &[2u8; 4_000]).unwrap();
    assert_ne!(dirty.page_id, logged.page_id);

    // Tear the safepointed image at log position 0.
    let mut log = OpenOptions::new()
        .write(true)
        .open(dir.path().join("tx.qdb-log"))
        .unwrap();
    log.seek(SeekFrom::Start(FILE_HEADER_SIZE as u64 + 100)).unwrap();
    log.write_all(&[0xA5; 64]).unwrap();
    log.sync_all().unwrap();

    assert!(matches!(tx.commit(), Err(Error::StructuralCorruption(_))));

    // Nothing was confirmed, and both pages went back as empty.
    let state = engine.dump_state();
    assert_eq!(state.version, 0);
    assert_eq!(state.log_confirmed_pages, 0);
    assert!(state.active_transactions.is_empty());
    assert_eq!(engine.free_pages(1).empty, 8);
    for page_id in [logged.page_id, dirty.page_id] {
        assert_eq!(engine.page_class(page_id), Some((1, PageClass::Empty)));
    }

    let mut tx = engine.begin_transaction(&[1]).unwrap();
    assert!(matches!(
        tx.read_page(dirty.page_id, |page| page.items_count()),
        Err(Error::PageNotFound(_))
    ));
    let address = data.insert(&mut tx, 1, b"after the failure").unwrap();
    tx.commit().unwrap();

    let tx = engine.begin_transaction(&[1]).unwrap();
    assert_eq!(data.read(&tx, address).unwrap(), b"after the failure");
    assert_eq!(engine.dump_state().version, 1);
}

#[test]
fn test_dropped_transaction_rolls_back() {
    let (engine, _dir) = open_engine();
    let data = DataService::new();

    {
        let mut tx = engine.begin_transaction(&[1]).unwrap();
        data.insert(&mut tx, 1, b"lost").unwrap();
    }

    let state = engine.dump_state();
    assert!(state.active_transactions.is_empty());
    assert_eq!(state.locks.readers, 0);
    assert_eq!(state.version, 0);
}

#[test]
fn test_multi_block_payload() {
    let (engine, _dir) = open_engine();
    let data = DataService::new();
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

    let mut tx = engine.begin_transaction(&[1]).unwrap();
    let address = data.insert(&mut tx, 1, &payload).unwrap();
    let empty = data.insert(&mut tx, 1, &[]).unwrap();
    tx.commit().unwrap();

    let mut tx = engine.begin_transaction(&[1]).unwrap();
    assert_eq!(data.read(&tx, address).unwrap(), payload);
    assert!(data.read(&tx, empty).unwrap().is_empty());

    let mut blocks = Vec::new();
    let mut current = address;
    while !current.is_empty() {
        let block = tx
            .read_page(current.page_id, |page| DataBlock::read(page, current.index))
            .unwrap();
        blocks.push(block);
        current = block.next_block;
    }
    assert_eq!(blocks.len(), 3);
    assert!(!blocks[0].extend);
    assert!(blocks[1..].iter().all(|b| b.extend));
    assert_eq!(blocks.iter().map(|b| b.payload_len).sum::<usize>(), payload.len());

    assert_eq!(data.delete(&mut tx, address).unwrap(), 3);
    assert_eq!(data.delete(&mut tx, empty).unwrap(), 1);
    tx.commit().unwrap();

    // Every page is empty again once the commit reaches the map.
    assert_eq!(engine.free_pages(1).empty, 8);
}

#[test]
fn test_get_free_page() {
    let (engine, _dir) = open_engine();

    let mut tx = engine.begin_transaction(&[1]).unwrap();
    let first = tx.get_free_page(1, PageType::Data, 50).unwrap();
    assert_eq!(engine.free_pages(1).empty, 7);

    // Reused while it has room.
    assert_eq!(tx.get_free_page(1, PageType::Data, 50).unwrap(), first);
    tx.page_mut(first).unwrap().insert(4_020);

    let second = tx.get_free_page(1, PageType::Data, 50).unwrap();
    assert_ne!(second, first);
    assert_eq!(engine.free_pages(1).empty, 6);

    // Index pages never share a page with data.
    let index = tx.get_free_page(1, PageType::Index, 100).unwrap();
    assert_ne!(index, first);
    assert_ne!(index, second);
    assert_eq!(tx.checked_out(), &[first, second, index]);

    assert!(matches!(
        tx.get_free_page(2, PageType::Data, 50),
        Err(Error::InvalidState(_))
    ));
    for page_type in [PageType::Header, PageType::Empty] {
        assert!(matches!(
            tx.get_free_page(1, page_type, 50),
            Err(Error::InvalidState(_))
        ));
    }
    assert_eq!(tx.checked_out().len(), 3);
    tx.rollback();
    assert_eq!(engine.free_pages(1).empty, 8);
}

#[test]
fn test_reserved_collection_and_map_pages() {
    let (engine, _dir) = open_engine();

    assert!(matches!(
        engine.begin_transaction(&[0]),
        Err(Error::InvalidState(_))
    ));

    let tx = engine.begin_transaction(&[1]).unwrap();
    assert!(matches!(
        tx.read_page(PageId(0), |page| page.items_count()),
        Err(Error::InvalidState(_))
    ));
}
