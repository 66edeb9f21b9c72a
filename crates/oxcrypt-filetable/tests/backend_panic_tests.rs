//! A backend that panics must not leave identifiers parked.
//!
//! Each test makes the memory backend panic once, catches the unwind, and
//! then opens the affected ids again from another thread with a timeout, so
//! a wedged slot fails the test instead of hanging it.

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use common::{new_table, table_with_backend, table_with_policy};
use oxcrypt_filetable::testing::{MemoryBackend, test_id};
use oxcrypt_filetable::{EvictionPolicy, FileId, FileKind, FileTable};

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Open `ids` on a fresh thread; `None` if that did not finish in time.
fn open_elsewhere(table: &Arc<FileTable<MemoryBackend>>, ids: Vec<FileId>) -> Option<bool> {
    let (tx, rx) = mpsc::channel();
    let table = Arc::clone(table);
    thread::spawn(move || {
        let all_opened = ids
            .iter()
            .all(|id| table.open_as(id, FileKind::RegularFile).is_ok());
        let _ = tx.send(all_opened);
    });
    rx.recv_timeout(OPEN_TIMEOUT).ok()
}

#[test]
fn test_materialize_panic_releases_placeholder() {
    let table = Arc::new(new_table());
    let id = test_id(1);
    table.backend().panic_materialize_once(id);

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = table.create_as(&id, FileKind::RegularFile);
    }));
    assert!(caught.is_err());
    assert_eq!(table.resident_count(), 0);

    // The failed create stored nothing, so create it for real this time
    drop(table.create_as(&id, FileKind::RegularFile).unwrap());
    assert_eq!(open_elsewhere(&table, vec![id]), Some(true));
}

/// An opener already waiting on the loading slot is woken and retries.
#[test]
fn test_materialize_panic_wakes_waiters() {
    let backend = MemoryBackend::new();
    backend.set_materialize_delay(Duration::from_millis(100));
    backend.insert_regular(test_id(2), b"seeded".to_vec());
    backend.panic_materialize_once(test_id(2));
    let table = Arc::new(table_with_backend(backend, EvictionPolicy::default()));

    let (tx, rx) = mpsc::channel();
    let waiter = Arc::clone(&table);
    thread::spawn(move || {
        // Arrive while the first load is still in flight
        thread::sleep(Duration::from_millis(20));
        let contents = waiter
            .open_as(&test_id(2), FileKind::RegularFile)
            .ok()
            .and_then(|handle| {
                let guard = handle.lock();
                guard.as_regular().map(|file| file.contents().to_vec())
            });
        let _ = tx.send(contents);
    });

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = table.open_as(&test_id(2), FileKind::RegularFile);
    }));
    assert!(caught.is_err());

    let contents = rx.recv_timeout(OPEN_TIMEOUT).expect("waiter stayed blocked");
    assert_eq!(contents.as_deref(), Some(&b"seeded"[..]));
}

/// A flush that panics mid-batch still clears every victim's slot.
#[test]
fn test_finalize_panic_settles_whole_batch() {
    let table = Arc::new(table_with_policy(2, 2));
    for n in 0..2 {
        drop(table.create_as(&test_id(n), FileKind::RegularFile).unwrap());
    }
    table.backend().panic_finalize_once(test_id(0));

    let trigger = table.create_as(&test_id(2), FileKind::RegularFile).unwrap();
    let caught = panic::catch_unwind(AssertUnwindSafe(move || {
        let _ = trigger.close();
    }));
    assert!(caught.is_err());

    assert_eq!(table.refcount(&test_id(0)), None);
    assert_eq!(table.refcount(&test_id(1)), None);
    assert_eq!(table.idle_ids(), vec![test_id(2)]);
    assert_eq!(table.resident_count(), 1);

    assert_eq!(open_elsewhere(&table, vec![test_id(0), test_id(1)]), Some(true));
}
