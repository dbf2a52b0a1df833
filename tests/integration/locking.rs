//! Integration tests for the store's lock, transaction cleanup and event
//! delivery.
//!
//! Verification command: `cargo test --test locking`

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Weak, mpsc};
use std::time::Duration;

use parking_lot::Mutex;
use syncstore::{Database, DatabaseConfig, DbError, Event};
use syncstore_proto::ids::TransportId;

// =============================================================================
// Helpers
// =============================================================================

fn open_store(dir: &tempfile::TempDir) -> Database {
    let db = Database::new(DatabaseConfig::at_path(dir.path().join("store.db"))).unwrap();
    db.open().unwrap();
    db
}

fn tcp() -> TransportId {
    TransportId::new("tcp")
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn nested_transaction_fails_fast() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    db.open().unwrap();

    let result = db.with_write_txn(|_| {
        let inner = db.start_transaction(true).map(|_| ());
        assert!(matches!(inner, Err(DbError::ReentrantTransaction)));
        assert!(matches!(db.close(), Err(DbError::ReentrantTransaction)));
        Ok(())
    });
    result.unwrap();

    // The outer transaction released everything.
    db.with_read_txn(|_| Ok(())).unwrap();
}

#[test]
fn two_stores_can_be_used_on_one_thread() {
    let a = Database::new(DatabaseConfig::default()).unwrap();
    let b = Database::new(DatabaseConfig::default()).unwrap();
    a.open().unwrap();
    b.open().unwrap();
    a.with_write_txn(|txn_a| {
        txn_a.add_transport(&tcp(), 1)?;
        b.with_write_txn(|txn_b| txn_b.add_transport(&tcp(), 2))
    })
    .unwrap();
    assert_eq!(b.with_read_txn(|t| t.get_transport_latencies()).unwrap()[&tcp()], 2);
}

#[test]
fn readers_run_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(&dir);
    let barrier = Barrier::new(3);

    std::thread::scope(|s| {
        for _ in 0..3 {
            s.spawn(|| {
                db.with_read_txn(|txn| {
                    // Every reader must be inside its transaction at once to
                    // get past the barrier.
                    barrier.wait();
                    txn.get_contacts()
                })
                .unwrap();
            });
        }
    });
}

#[test]
fn writer_excludes_readers() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(&dir);
    let written = AtomicBool::new(false);
    let (started_tx, started_rx) = mpsc::channel();

    std::thread::scope(|s| {
        s.spawn(|| {
            db.with_write_txn(|txn| {
                started_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                txn.add_transport(&tcp(), 5)?;
                written.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        });

        started_rx.recv().unwrap();
        let seen = db.with_read_txn(|txn| txn.contains_transport(&tcp())).unwrap();
        assert!(written.load(Ordering::SeqCst));
        assert!(seen);
    });
}

#[test]
fn panicking_transaction_releases_lock_and_rolls_back() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    db.open().unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        db.with_write_txn(|txn| -> syncstore::Result<()> {
            txn.add_transport(&tcp(), 5)?;
            panic!("caller bug");
        })
    }));
    assert!(outcome.is_err());

    assert!(!db.with_read_txn(|txn| txn.contains_transport(&tcp())).unwrap());
}

#[test]
fn events_arrive_after_commit_and_unlock() {
    let db = Arc::new(Database::new(DatabaseConfig::default()).unwrap());
    db.open().unwrap();

    let observed = Arc::new(Mutex::new(Vec::new()));
    let weak: Weak<Database> = Arc::downgrade(&db);
    let sink = observed.clone();
    db.event_bus().add_listener(Arc::new(move |e: &Event| {
        if let (Event::TransportAdded { transport_id, .. }, Some(db)) = (e, weak.upgrade()) {
            // The listener can open its own transaction and sees the change.
            let visible = db.with_read_txn(|txn| txn.contains_transport(transport_id));
            sink.lock().push(visible.unwrap_or(false));
        }
    }));

    db.with_write_txn(|txn| txn.add_transport(&tcp(), 5)).unwrap();
    assert_eq!(*observed.lock(), vec![true]);
}

#[test]
fn aborted_transactions_emit_nothing() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    db.open().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    db.event_bus()
        .add_listener(Arc::new(move |e: &Event| sink.lock().push(e.clone())));

    // Error returned from the closure.
    let result: Result<(), DbError> = db.with_write_txn(|txn| {
        txn.add_transport(&tcp(), 5)?;
        Err(DbError::InvalidArgument("changed my mind".into()))
    });
    assert!(result.is_err());

    // Transaction ended without commit.
    let mut txn = db.start_transaction(false).unwrap();
    txn.add_transport(&tcp(), 5).unwrap();
    assert_eq!(txn.events().len(), 1);
    db.end(txn);

    assert!(events.lock().is_empty());
    assert!(!db.with_read_txn(|txn| txn.contains_transport(&tcp())).unwrap());
}

#[test]
fn read_only_transaction_rejects_mutation() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    db.open().unwrap();
    let mut txn = db.start_transaction(true).unwrap();
    assert!(txn.is_read_only());
    assert!(matches!(
        txn.add_transport(&tcp(), 5),
        Err(DbError::ReadOnlyTransaction)
    ));
    db.commit(&mut txn).unwrap();
    assert!(txn.is_committed());
    db.end(txn);
}

#[test]
fn close_waits_for_running_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_store(&dir);
    let (started_tx, started_rx) = mpsc::channel();
    let finished = AtomicBool::new(false);

    std::thread::scope(|s| {
        s.spawn(|| {
            db.with_write_txn(|txn| {
                started_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                txn.add_transport(&tcp(), 5)?;
                finished.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        });
        started_rx.recv().unwrap();
        db.close().unwrap();
        assert!(finished.load(Ordering::SeqCst));
    });

    let db = open_store(&dir);
    assert!(!db.was_dirty_on_initialisation());
    assert!(db.with_read_txn(|txn| txn.contains_transport(&tcp())).unwrap());
}
