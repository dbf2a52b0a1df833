//! Integration tests for opening, reopening and migrating file-backed stores.
//!
//! Verification command: `cargo test --test store_lifecycle`

use std::path::Path;

use rusqlite::Connection;
use syncstore::db::schema::{DB_SETTINGS_NAMESPACE, MIN_SCHEMA_VERSION_KEY, SCHEMA_VERSION_KEY};
use syncstore::{
    Database, DatabaseConfig, DbError, ErrorKind, Migration, SchemaMigrator, TypeMap,
};
use syncstore_proto::ids::TransportId;
use syncstore_proto::message::Settings;

// =============================================================================
// Helpers
// =============================================================================

fn store_at(path: &Path) -> Database {
    Database::new(DatabaseConfig::at_path(path)).unwrap()
}

fn versions(db: &Database) -> (String, String) {
    let s = db
        .with_read_txn(|txn| txn.get_settings(DB_SETTINGS_NAMESPACE))
        .unwrap();
    (
        s[SCHEMA_VERSION_KEY].clone(),
        s[MIN_SCHEMA_VERSION_KEY].clone(),
    )
}

fn add_audit_table(conn: &Connection, _: &TypeMap) -> syncstore::Result<()> {
    conn.execute_batch("CREATE TABLE audit (entry TEXT NOT NULL)")?;
    Ok(())
}

fn broken_step(conn: &Connection, _: &TypeMap) -> syncstore::Result<()> {
    conn.execute_batch("CREATE TABLE half_done (x INTEGER)")?;
    Err(DbError::State("step failed".to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn create_then_reopen_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let tcp = TransportId::new("tcp");

    let db = store_at(&path);
    assert!(!db.open().unwrap(), "first open creates");
    db.with_write_txn(|txn| txn.add_transport(&tcp, 10_000)).unwrap();
    db.close().unwrap();

    let db = store_at(&path);
    assert!(db.open().unwrap(), "second open reopens");
    assert!(!db.was_dirty_on_initialisation());
    assert_eq!(versions(&db), ("3".to_string(), "1".to_string()));
    assert!(db.with_read_txn(|txn| txn.contains_transport(&tcp)).unwrap());
}

#[test]
fn unclean_shutdown_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let db = store_at(&path);
    db.open().unwrap();
    // Simulate a crash: the clean marker is never written.
    std::mem::forget(db);

    let db = store_at(&path);
    db.open().unwrap();
    assert!(db.was_dirty_on_initialisation());
    db.close().unwrap();

    let db = store_at(&path);
    db.open().unwrap();
    assert!(!db.was_dirty_on_initialisation());
}

#[test]
fn closed_store_rejects_transactions() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    assert!(matches!(db.start_transaction(true), Err(DbError::Closed)));
    db.open().unwrap();
    db.close().unwrap();
    assert!(matches!(db.start_transaction(false), Err(DbError::Closed)));
    assert!(matches!(db.open(), Err(DbError::Closed)));
    // Closing twice is harmless.
    db.close().unwrap();
}

#[test]
fn too_old_store_fails_closed_without_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let tcp = TransportId::new("tcp");

    let db = store_at(&path);
    db.open().unwrap();
    db.with_write_txn(|txn| txn.add_transport(&tcp, 10_000)).unwrap();
    db.close().unwrap();

    let future = store_at(&path).with_migrator(SchemaMigrator::new(9, 5, Vec::new()));
    let err = future.open().unwrap_err();
    assert!(matches!(err, DbError::DataTooOld));
    assert_eq!(err.kind(), ErrorKind::Storage);
    drop(future);

    let db = store_at(&path);
    db.open().unwrap();
    assert!(!db.was_dirty_on_initialisation(), "failed open left no marker");
    assert_eq!(versions(&db).0, "3");
    assert!(db.with_read_txn(|txn| txn.contains_transport(&tcp)).unwrap());
}

#[test]
fn newer_store_opens_only_when_declared_compatible() {
    let dir = tempfile::tempdir().unwrap();

    let compatible = dir.path().join("compatible.db");
    let db = store_at(&compatible).with_migrator(SchemaMigrator::new(4, 2, Vec::new()));
    db.open().unwrap();
    db.close().unwrap();
    let db = store_at(&compatible);
    assert!(db.open().unwrap());
    assert_eq!(versions(&db), ("4".to_string(), "2".to_string()));
    db.close().unwrap();

    let incompatible = dir.path().join("incompatible.db");
    let db = store_at(&incompatible).with_migrator(SchemaMigrator::new(6, 4, Vec::new()));
    db.open().unwrap();
    db.close().unwrap();
    assert!(matches!(store_at(&incompatible).open(), Err(DbError::DataTooNew)));
}

#[test]
fn custom_migration_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    store_at(&path).open().unwrap();

    let next = || {
        SchemaMigrator::new(
            4,
            1,
            vec![Migration {
                start: 3,
                end: 4,
                migrate: add_audit_table,
            }],
        )
    };
    let db = store_at(&path).with_migrator(next());
    db.open().unwrap();
    assert_eq!(versions(&db).0, "4");
    db.close().unwrap();

    // A second run finds the store current and does not recreate the table.
    let db = store_at(&path).with_migrator(next());
    db.open().unwrap();
    db.close().unwrap();

    let conn = Connection::open(&path).unwrap();
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'audit'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(tables, 1);
}

#[test]
fn failed_migration_rolls_back_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    store_at(&path).open().unwrap();

    let migrator = SchemaMigrator::new(
        5,
        1,
        vec![
            Migration {
                start: 3,
                end: 4,
                migrate: add_audit_table,
            },
            Migration {
                start: 4,
                end: 5,
                migrate: broken_step,
            },
        ],
    );
    let result = store_at(&path).with_migrator(migrator).open();
    assert!(matches!(result, Err(DbError::State(_))));

    let conn = Connection::open(&path).unwrap();
    let leftovers: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name IN ('audit', 'half_done')",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(leftovers, 0);
    drop(conn);

    let db = store_at(&path);
    db.open().unwrap();
    assert_eq!(versions(&db).0, "3");
}

#[test]
fn settings_namespaces_are_independent() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    db.open().unwrap();
    let mut app = Settings::new();
    app.insert("theme".to_string(), "dark".to_string());
    db.with_write_txn(|txn| txn.merge_settings(&app, "app")).unwrap();

    let (app_read, db_read) = db
        .with_read_txn(|txn| Ok((txn.get_settings("app")?, txn.get_settings(DB_SETTINGS_NAMESPACE)?)))
        .unwrap();
    assert_eq!(app_read, app);
    assert!(!db_read.contains_key("theme"));
    assert_eq!(db_read[SCHEMA_VERSION_KEY], "3");
}
