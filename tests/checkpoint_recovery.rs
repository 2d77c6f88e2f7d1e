//! Integration tests for the write-ahead log: commit durability, crash
//! recovery, checkpoint and encrypted files.

use std::fs;
use std::mem;

use quillstore::allocation::PageClass;
use quillstore::data::DataService;
use quillstore::storage::FileKind;
use quillstore::{DiskStream, Engine, EngineSettings, Error, Page, PageAddress};
use tempfile::{tempdir, TempDir};

const COL: u8 = 1;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn settings(dir: &TempDir) -> EngineSettings {
    init_logger();
    EngineSettings::new(dir.path().join("recovery.qdb")).kdf_rounds(1_000)
}

fn store(engine: &Engine, payload: &[u8]) -> PageAddress {
    let mut tx = engine.begin_transaction(&[COL]).unwrap();
    let address = DataService::new().insert(&mut tx, COL, payload).unwrap();
    tx.commit().unwrap();
    address
}

fn load(engine: &Engine, address: PageAddress) -> Vec<u8> {
    let tx = engine.begin_transaction(&[COL]).unwrap();
    DataService::new().read(&tx, address).unwrap()
}

#[test]
fn test_commit_survives_crash() {
    let dir = tempdir().unwrap();

    let address = {
        let engine = Engine::open(settings(&dir)).unwrap();
        let address = store(&engine, b"durable document");
        assert!(engine.dump_state().log_confirmed_pages > 0);
        // Dropped without shutdown: the page only exists in the log.
        address
    };

    let engine = Engine::open(settings(&dir)).unwrap();
    assert_eq!(load(&engine, address), b"durable document");

    let state = engine.dump_state();
    assert_eq!(state.log_positions, 0);
    assert_eq!(state.log_confirmed_pages, 0);
}

#[test]
fn test_unconfirmed_safepoint_is_discarded_by_recovery() {
    let dir = tempdir().unwrap();
    let data = DataService::new();

    let (kept, page_id) = {
        let engine = Engine::open(settings(&dir)).unwrap();
        let kept = store(&engine, b"committed");

        let mut tx = engine.begin_transaction(&[COL]).unwrap();
        let lost = data.insert(&mut tx, COL, b"never committed").unwrap();
        assert_eq!(lost.page_id, kept.page_id);
        tx.safepoint().unwrap();
        assert_eq!(tx.safepointed_count(), 1);
        assert!(engine.dump_state().log_positions >= 2);

        // Crash with the transaction still open.
        mem::forget(tx);
        (kept, kept.page_id)
    };

    let engine = Engine::open(settings(&dir)).unwrap();
    let dump = engine.dump_page(page_id).unwrap();
    assert_eq!(dump.page.items_count(), 1);
    assert_eq!(load(&engine, kept), b"committed");
}

#[test]
fn test_checkpoint_writes_last_committed_image() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(settings(&dir)).unwrap();

    let first = store(&engine, b"version one");
    let mut tx = engine.begin_transaction(&[COL]).unwrap();
    tx.page_mut(first.page_id).unwrap().get_mut(first.index)[6..]
        .copy_from_slice(b"version two");
    tx.commit().unwrap();

    assert_eq!(engine.dump_state().log_confirmed_pages, 1);
    assert_eq!(engine.checkpoint().unwrap(), 1);
    assert_eq!(engine.dump_state().log_positions, 0);
    assert_eq!(load(&engine, first), b"version two");
    engine.shutdown().unwrap();

    let mut disk = DiskStream::open(dir.path().join("recovery.qdb"), FileKind::Data, None).unwrap();
    let mut page = Page::new();
    disk.read_page(first.page_id.0, &mut page).unwrap();
    assert!(page.verify_checksum());
    assert_eq!(page.transaction_id(), 0);
    assert!(!page.is_confirmed());
    assert_eq!(&page.get(first.index)[6..], b"version two");
}

#[test]
fn test_checkpoint_without_log_is_noop() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(settings(&dir)).unwrap();
    assert_eq!(engine.checkpoint().unwrap(), 0);
    assert_eq!(engine.checkpoint().unwrap(), 0);
}

#[test]
fn test_allocation_map_reconciled_after_crash() {
    let dir = tempdir().unwrap();

    let address = {
        let engine = Engine::open(settings(&dir)).unwrap();
        store(&engine, &[7u8; 100])
    };

    let engine = Engine::open(settings(&dir)).unwrap();
    assert_eq!(
        engine.page_class(address.page_id),
        Some((COL, PageClass::DataLarge))
    );
    assert!(engine.free_pages(COL).data_large >= 1);

    // The recovered page is handed out again instead of a fresh one.
    let next = store(&engine, &[8u8; 100]);
    assert_eq!(next.page_id, address.page_id);
}

#[test]
fn test_rollback_leaves_no_log_trace() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(settings(&dir)).unwrap();

    let mut tx = engine.begin_transaction(&[COL]).unwrap();
    DataService::new().insert(&mut tx, COL, b"draft").unwrap();
    tx.safepoint().unwrap();
    tx.rollback();

    let state = engine.dump_state();
    assert_eq!(state.log_confirmed_pages, 0);
    assert!(state.active_transactions.is_empty());
    drop(engine);

    let engine = Engine::open(settings(&dir)).unwrap();
    assert_eq!(engine.dump_state().data_pages, 1);
}

#[test]
fn test_stale_log_without_data_file_is_removed() {
    let dir = tempdir().unwrap();
    let settings = settings(&dir);

    {
        let engine = Engine::open(settings.clone()).unwrap();
        store(&engine, b"orphan");
    }
    fs::remove_file(&settings.filename).unwrap();
    assert!(settings.log_filename().exists());

    let engine = Engine::open(settings).unwrap();
    assert_eq!(engine.dump_state().log_positions, 0);
    assert_eq!(engine.dump_state().data_pages, 1);
}

#[test]
fn test_encrypted_round_trip() {
    let dir = tempdir().unwrap();
    let secret = b"top-secret-payload-0123456789";

    let address = {
        let engine = Engine::open(settings(&dir).password("hunter2")).unwrap();
        assert!(engine.dump_state().encrypted);
        let address = store(&engine, secret);
        engine.shutdown().unwrap();
        address
    };

    let raw = fs::read(dir.path().join("recovery.qdb")).unwrap();
    assert!(!raw.windows(secret.len()).any(|w| w == secret));

    let engine = Engine::open(settings(&dir).password("hunter2")).unwrap();
    assert_eq!(load(&engine, address), secret);
}

#[test]
fn test_encrypted_crash_recovery() {
    let dir = tempdir().unwrap();

    let address = {
        let engine = Engine::open(settings(&dir).password("hunter2")).unwrap();
        store(&engine, b"in the log only")
    };

    let raw = fs::read(settings(&dir).log_filename()).unwrap();
    assert!(!raw.windows(15).any(|w| w == b"in the log only"));

    let engine = Engine::open(settings(&dir).password("hunter2")).unwrap();
    assert_eq!(load(&engine, address), b"in the log only");
}

#[test]
fn test_password_mismatch() {
    let dir = tempdir().unwrap();
    Engine::open(settings(&dir).password("hunter2"))
        .unwrap()
        .shutdown()
        .unwrap();

    assert!(matches!(
        Engine::open(settings(&dir).password("wrong")),
        Err(Error::InvalidPassword)
    ));
    assert!(matches!(Engine::open(settings(&dir)), Err(Error::InvalidPassword)));

    let plain = tempdir().unwrap();
    Engine::open(settings(&plain)).unwrap().shutdown().unwrap();
    assert!(matches!(
        Engine::open(settings(&plain).password("hunter2")),
        Err(Error::InvalidPassword)
    ));
}

#[test]
fn test_foreign_file_is_corruption() {
    let dir = tempdir().unwrap();
    let settings = settings(&dir);
    fs::write(&settings.filename, vec![0xAB; 8192]).unwrap();

    assert!(matches!(
        Engine::open(settings),
        Err(Error::StructuralCorruption(_))
    ));
}
