//! Integration tests for transports and transport key storage.
//!
//! Verification command: `cargo test --test transport_keys`

use std::collections::BTreeMap;

use syncstore::{Database, DatabaseConfig, DbError, Event};
use syncstore_proto::identity::{Author, LocalAuthor};
use syncstore_proto::ids::{AuthorId, ContactId, Timestamp, TransportId};
use syncstore_proto::keys::{
    IncomingKeys, OutgoingKeys, REORDERING_WINDOW_BYTES, SecretKey, TransportKeys,
};

// =============================================================================
// Helpers
// =============================================================================

fn author(n: u8) -> Author {
    Author {
        id: AuthorId::new([n; 32]),
        name: format!("author-{n}"),
        public_key: vec![n; 32],
    }
}

/// Adds local author 1 and contacts for authors 2 and 3.
fn with_contacts(db: &Database) -> (ContactId, ContactId) {
    db.with_write_txn(|txn| {
        txn.add_local_author(&LocalAuthor {
            author: author(1),
            private_key: vec![0; 32],
            created: Timestamp::from_millis(0),
        })?;
        let mine = AuthorId::new([1; 32]);
        Ok((
            txn.add_contact(&author(2), mine, true, true)?,
            txn.add_contact(&author(3), mine, true, true)?,
        ))
    })
    .unwrap()
}

fn key(b: u8) -> SecretKey {
    SecretKey::new([b; 32])
}

/// Key set centred on `period`, with key bytes derived from `seed`.
fn keys_for(t: &TransportId, period: u64, seed: u8) -> TransportKeys {
    TransportKeys {
        transport_id: t.clone(),
        previous: IncomingKeys::new(key(seed), key(seed + 1), period - 1),
        current: IncomingKeys::new(key(seed + 2), key(seed + 3), period),
        next: IncomingKeys::new(key(seed + 4), key(seed + 5), period + 1),
        outgoing: OutgoingKeys {
            tag_key: key(seed + 6),
            header_key: key(seed + 7),
            rotation_period: period,
            stream_counter: 0,
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn keys_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let tor = TransportId::new("tor");

    let db = Database::new(DatabaseConfig::at_path(&path)).unwrap();
    db.open().unwrap();
    let (a, b) = with_contacts(&db);
    db.with_write_txn(|txn| {
        txn.add_transport(&tor, 60_000)?;
        txn.add_transport_keys(a, &keys_for(&tor, 100, 10))?;
        txn.add_transport_keys(b, &keys_for(&tor, 100, 50))?;
        for _ in 0..3 {
            txn.increment_stream_counter(a, &tor, 100)?;
        }
        txn.set_reordering_window(b, &tor, 99, 7, &[0xff, 0, 0, 0])
    })
    .unwrap();
    db.close().unwrap();

    let db = Database::new(DatabaseConfig::at_path(&path)).unwrap();
    db.open().unwrap();
    let all = db.with_read_txn(|txn| txn.get_transport_keys(&tor)).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[&a].outgoing.stream_counter, 3);
    assert_eq!(all[&a].current.tag_key, key(12));
    assert_eq!(all[&b].outgoing.stream_counter, 0);
    assert_eq!(all[&b].previous.window_base, 7);
    assert_eq!(all[&b].previous.window_bitmap, vec![0xff, 0, 0, 0]);
    assert_eq!(all[&b].current.window_bitmap, vec![0; REORDERING_WINDOW_BYTES]);
}

#[test]
fn rotation_replaces_key_sets() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    db.open().unwrap();
    let (a, b) = with_contacts(&db);
    let tor = TransportId::new("tor");
    db.with_write_txn(|txn| {
        txn.add_transport(&tor, 60_000)?;
        txn.add_transport_keys(a, &keys_for(&tor, 100, 10))?;
        txn.add_transport_keys(b, &keys_for(&tor, 100, 50))
    })
    .unwrap();

    // Rotate one period forward: the old current set becomes previous.
    let mut rotated = db.with_read_txn(|txn| txn.get_transport_keys(&tor)).unwrap();
    for keys in rotated.values_mut() {
        keys.previous = keys.current.clone();
        keys.current = keys.next.clone();
        keys.next = IncomingKeys::new(key(200), key(201), 102);
        keys.outgoing.rotation_period = 101;
        keys.outgoing.stream_counter = 0;
    }
    db.with_write_txn(|txn| txn.update_transport_keys(&rotated))
        .unwrap();

    let stored = db.with_read_txn(|txn| txn.get_transport_keys(&tor)).unwrap();
    assert_eq!(stored, rotated);
    assert_eq!(stored[&a].rotation_period(), 101);
    let periods: Vec<u64> = stored[&b]
        .incoming()
        .iter()
        .map(|k| k.rotation_period)
        .collect();
    assert_eq!(periods, vec![100, 101, 102]);
}

#[test]
fn keys_require_known_contact_and_transport() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    db.open().unwrap();
    let (a, _) = with_contacts(&db);
    let tor = TransportId::new("tor");

    assert!(matches!(
        db.with_write_txn(|txn| txn.add_transport_keys(a, &keys_for(&tor, 5, 1))),
        Err(DbError::NoSuchTransport)
    ));
    db.with_write_txn(|txn| txn.add_transport(&tor, 1)).unwrap();
    assert!(matches!(
        db.with_write_txn(|txn| txn.add_transport_keys(ContactId::new(42), &keys_for(&tor, 5, 1))),
        Err(DbError::NoSuchContact)
    ));
    assert!(matches!(
        db.with_write_txn(|txn| txn.increment_stream_counter(a, &TransportId::new("lan"), 5)),
        Err(DbError::NoSuchTransport)
    ));
    assert!(matches!(
        db.with_write_txn(|txn| txn.remove_transport(&TransportId::new("lan"))),
        Err(DbError::NoSuchTransport)
    ));
}

#[test]
fn transport_events_follow_commits() {
    let db = Database::new(DatabaseConfig::default()).unwrap();
    db.open().unwrap();
    let tor = TransportId::new("tor");

    let mut txn = db.start_transaction(false).unwrap();
    txn.add_transport(&tor, 30_000).unwrap();
    txn.remove_transport(&tor).unwrap();
    assert_eq!(
        txn.events(),
        &[
            Event::TransportAdded {
                transport_id: tor.clone(),
                max_latency: 30_000,
            },
            Event::TransportRemoved(tor.clone()),
        ]
    );
    db.commit(&mut txn).unwrap();
    db.end(txn);

    let latencies: BTreeMap<TransportId, u32> =
        db.with_read_txn(|txn| txn.get_transport_latencies()).unwrap();
    assert!(latencies.is_empty());
}
