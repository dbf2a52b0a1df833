//! Fixtures shared by the store's unit tests.

use std::sync::Arc;

use syncstore_proto::identity::{Author, LocalAuthor};
use syncstore_proto::ids::{AuthorId, ClientId, ContactId, GroupId, MessageId, Timestamp};
use syncstore_proto::message::{Group, Message};

use super::Database;
use crate::clock::SettableClock;
use crate::config::DatabaseConfig;

pub(crate) const NOW: u64 = 1_000_000;

/// An open in-memory store on a settable clock.
pub(crate) fn open_db() -> (Database, Arc<SettableClock>) {
    let clock = Arc::new(SettableClock::new(NOW));
    let db = Database::new(DatabaseConfig::default())
        .unwrap()
        .with_clock(clock.clone());
    db.open().unwrap();
    (db, clock)
}

pub(crate) fn author(n: u8) -> Author {
    Author {
        id: AuthorId::new([n; 32]),
        name: format!("author-{n}"),
        public_key: vec![n; 32],
    }
}

pub(crate) fn local_author(n: u8) -> LocalAuthor {
    LocalAuthor {
        author: author(n),
        private_key: vec![n ^ 0xff; 32],
        created: Timestamp::from_millis(u64::from(n)),
    }
}

pub(crate) fn group(n: u8) -> Group {
    Group {
        id: GroupId::new([n; 32]),
        client_id: ClientId::new("test-client"),
        descriptor: vec![n],
    }
}

pub(crate) fn message(n: u8, group_id: GroupId, timestamp: u64) -> Message {
    Message {
        id: MessageId::new([n; 32]),
        group_id,
        timestamp: Timestamp::from_millis(timestamp),
        raw: vec![n; 100],
    }
}

/// A store with local author 1, contact (author 2) and group 10.
pub(crate) fn populated_db() -> (Database, Arc<SettableClock>, ContactId, Group) {
    let (db, clock) = open_db();
    let g = group(10);
    let c = db
        .with_write_txn(|txn| {
            txn.add_local_author(&local_author(1))?;
            let c = txn.add_contact(&author(2), AuthorId::new([1; 32]), true, true)?;
            txn.add_group(&g)?;
            Ok(c)
        })
        .unwrap();
    (db, clock, c, g)
}
