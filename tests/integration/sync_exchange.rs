//! Integration tests for the sync protocol between two stores.
//!
//! Each test wires two independent `Database`s ("alice" and "bob") that know
//! each other as contacts and share one group, then carries records between
//! them the way a transport would.
//!
//! Verification command: `cargo test --test sync_exchange`

use std::sync::Arc;

use parking_lot::Mutex;
use syncstore::{Database, DatabaseConfig, Event, SettableClock};
use syncstore_proto::identity::{Author, LocalAuthor};
use syncstore_proto::ids::{AuthorId, ClientId, ContactId, GroupId, MessageId, Timestamp};
use syncstore_proto::message::{Group, Message, MessageState, Metadata, Visibility};
use syncstore_proto::record::{Offer, Record};

// =============================================================================
// Helpers
// =============================================================================

const NOW: u64 = 5_000_000;
const MAX_LATENCY: u32 = 60_000;

fn author(n: u8) -> Author {
    Author {
        id: AuthorId::new([n; 32]),
        name: format!("peer-{n}"),
        public_key: vec![n; 32],
    }
}

fn group() -> Group {
    Group {
        id: GroupId::new([0xaa; 32]),
        client_id: ClientId::new("forum"),
        descriptor: b"general".to_vec(),
    }
}

fn message(n: u8) -> Message {
    Message {
        id: MessageId::new([n; 32]),
        group_id: group().id,
        timestamp: Timestamp::from_millis(u64::from(n)),
        raw: vec![n; 64],
    }
}

struct Peer {
    db: Database,
    clock: Arc<SettableClock>,
    /// The other peer, as a contact of this one.
    contact: ContactId,
}

/// Opens a store owned by author `me` with `them` as a contact who can see
/// the shared group.
fn peer(me: u8, them: u8) -> Peer {
    let clock = Arc::new(SettableClock::new(NOW));
    let db = Database::new(DatabaseConfig::default())
        .unwrap()
        .with_clock(clock.clone());
    db.open().unwrap();
    let contact = db
        .with_write_txn(|txn| {
            txn.add_local_author(&LocalAuthor {
                author: author(me),
                private_key: vec![0; 32],
                created: Timestamp::from_millis(0),
            })?;
            let c = txn.add_contact(&author(them), AuthorId::new([me; 32]), true, true)?;
            txn.add_group(&group())?;
            txn.set_group_visibility(c, &group().id, Visibility::Shared)?;
            Ok(c)
        })
        .unwrap();
    Peer { db, clock, contact }
}

fn pair() -> (Peer, Peer) {
    (peer(1, 2), peer(2, 1))
}

fn post(p: &Peer, m: &Message) {
    p.db.with_write_txn(|txn| txn.add_local_message(m, &Metadata::new(), true))
        .unwrap();
}

fn record_events(db: &Database) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    db.event_bus()
        .add_listener(Arc::new(move |e: &Event| sink.lock().push(e.clone())));
    seen
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn offer_request_batch_ack_round_trip() {
    let (alice, bob) = pair();
    let m = message(1);
    post(&alice, &m);
    let bob_events = record_events(&bob.db);

    // Alice offers, Bob remembers the offer and requests it.
    let offer = alice
        .db
        .with_write_txn(|txn| txn.generate_offer(alice.contact, 10, MAX_LATENCY))
        .unwrap()
        .unwrap();
    assert_eq!(offer.message_ids, vec![m.id]);
    bob.db
        .with_write_txn(|txn| txn.receive_offer(bob.contact, &offer))
        .unwrap();
    assert!(bob_events.lock().contains(&Event::MessageToRequest(bob.contact)));

    let request = bob
        .db
        .with_write_txn(|txn| txn.generate_request(bob.contact, 10))
        .unwrap()
        .unwrap();
    assert_eq!(request.message_ids, vec![m.id]);
    assert!(bob
        .db
        .with_write_txn(|txn| txn.generate_request(bob.contact, 10))
        .unwrap()
        .is_none());

    // Alice sends the requested message even though its backoff has not
    // expired, and only once.
    alice
        .db
        .with_write_txn(|txn| txn.receive_request(alice.contact, &request))
        .unwrap();
    let batch = alice
        .db
        .with_write_txn(|txn| txn.generate_requested_batch(alice.contact, 1 << 20, MAX_LATENCY))
        .unwrap()
        .unwrap();
    assert_eq!(batch, vec![m.raw.clone()]);
    assert!(alice
        .db
        .with_write_txn(|txn| txn.generate_requested_batch(alice.contact, 1 << 20, MAX_LATENCY))
        .unwrap()
        .is_none());

    // Bob stores the message unvalidated and owes Alice an ack.
    let received = Message {
        raw: batch[0].clone(),
        ..m.clone()
    };
    bob.db
        .with_write_txn(|txn| txn.receive_message(bob.contact, &received))
        .unwrap();
    bob.db
        .with_read_txn(|txn| {
            assert_eq!(txn.get_message_state(&m.id)?, MessageState::Unknown);
            assert_eq!(txn.get_raw_message(&m.id)?, Some(m.raw.clone()));
            Ok(())
        })
        .unwrap();
    assert!(bob_events.lock().contains(&Event::MessageAdded {
        message_id: m.id,
        group_id: m.group_id,
        contact_id: Some(bob.contact),
    }));

    let ack = bob
        .db
        .with_write_txn(|txn| txn.generate_ack(bob.contact, 10))
        .unwrap()
        .unwrap();
    assert_eq!(ack.message_ids, vec![m.id]);
    assert!(bob
        .db
        .with_write_txn(|txn| txn.generate_ack(bob.contact, 10))
        .unwrap()
        .is_none());

    // The ack settles the message on Alice's side.
    alice
        .db
        .with_write_txn(|txn| txn.receive_ack(alice.contact, &ack))
        .unwrap();
    let status = alice
        .db
        .with_read_txn(|txn| txn.get_message_status_for(alice.contact, &m.id))
        .unwrap()
        .unwrap();
    assert!(status.sent);
    assert!(status.seen);
    alice.clock.advance(u64::from(MAX_LATENCY) * 100);
    assert!(alice
        .db
        .with_write_txn(|txn| txn.generate_offer(alice.contact, 10, MAX_LATENCY))
        .unwrap()
        .is_none());
}

#[test]
fn offer_of_held_message_is_acked_not_requested() {
    let (alice, bob) = pair();
    let m = message(3);
    post(&alice, &m);
    post(&bob, &m);

    let offer = alice
        .db
        .with_write_txn(|txn| txn.generate_offer(alice.contact, 10, MAX_LATENCY))
        .unwrap()
        .unwrap();
    bob.db
        .with_write_txn(|txn| txn.receive_offer(bob.contact, &offer))
        .unwrap();

    assert!(bob
        .db
        .with_write_txn(|txn| txn.generate_request(bob.contact, 10))
        .unwrap()
        .is_none());
    let ack = bob
        .db
        .with_write_txn(|txn| txn.generate_ack(bob.contact, 10))
        .unwrap()
        .unwrap();
    assert_eq!(ack.message_ids, vec![m.id]);
    // Bob no longer offers Alice a message she has offered him.
    assert!(bob
        .db
        .with_write_txn(|txn| txn.generate_offer(bob.contact, 10, MAX_LATENCY))
        .unwrap()
        .is_none());
}

#[test]
fn received_message_is_relayed_after_validation() {
    let (alice, bob) = pair();
    let m = message(4);
    post(&alice, &m);
    let batch = alice
        .db
        .with_write_txn(|txn| txn.generate_batch(alice.contact, 1 << 20, MAX_LATENCY))
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 1);

    // A third contact of Bob's who can also see the group.
    let carol = bob
        .db
        .with_write_txn(|txn| {
            let c = txn.add_contact(&author(3), AuthorId::new([2; 32]), true, true)?;
            txn.set_group_visibility(c, &group().id, Visibility::Shared)?;
            txn.receive_message(bob.contact, &m)?;
            Ok(c)
        })
        .unwrap();

    // Unvalidated messages are not passed on.
    assert!(bob
        .db
        .with_write_txn(|txn| txn.generate_offer(carol, 10, MAX_LATENCY))
        .unwrap()
        .is_none());

    bob.db
        .with_write_txn(|txn| {
            assert_eq!(txn.get_messages_to_validate()?, vec![m.id]);
            txn.set_message_state(&m.id, MessageState::Delivered)?;
            txn.set_message_shared(&m.id)
        })
        .unwrap();

    let offer = bob
        .db
        .with_write_txn(|txn| txn.generate_offer(carol, 10, MAX_LATENCY))
        .unwrap()
        .unwrap();
    assert_eq!(offer.message_ids, vec![m.id]);
    // Alice sent it, so Bob never offers it back to her.
    assert!(bob
        .db
        .with_write_txn(|txn| txn.generate_offer(bob.contact, 10, MAX_LATENCY))
        .unwrap()
        .is_none());
}

#[test]
fn records_survive_the_wire_codec() {
    let (alice, bob) = pair();
    for n in 1..=5 {
        post(&alice, &message(n));
    }
    let offer = alice
        .db
        .with_write_txn(|txn| txn.generate_offer(alice.contact, 10, MAX_LATENCY))
        .unwrap()
        .unwrap();

    let frame = syncstore_proto::codec::encode_framed(&Record::Offer(offer)).unwrap();
    let (decoded, _) = syncstore_proto::codec::decode_framed(&frame).unwrap();
    let Record::Offer(offer) = decoded else {
        panic!("expected an offer, got {decoded:?}");
    };
    assert_eq!(offer.message_ids.len(), 5);

    bob.db
        .with_write_txn(|txn| txn.receive_offer(bob.contact, &offer))
        .unwrap();
    let request = bob
        .db
        .with_write_txn(|txn| txn.generate_request(bob.contact, 3))
        .unwrap()
        .unwrap();
    assert_eq!(request.message_ids.len(), 3);
}

#[test]
fn offer_cap_holds_across_offers() {
    let bob = {
        let clock = Arc::new(SettableClock::new(NOW));
        let config = DatabaseConfig {
            max_offered_messages: 4,
            ..DatabaseConfig::default()
        };
        let db = Database::new(config).unwrap().with_clock(clock.clone());
        db.open().unwrap();
        let contact = db
            .with_write_txn(|txn| {
                txn.add_local_author(&LocalAuthor {
                    author: author(2),
                    private_key: vec![0; 32],
                    created: Timestamp::from_millis(0),
                })?;
                txn.add_contact(&author(1), AuthorId::new([2; 32]), true, true)
            })
            .unwrap();
        Peer { db, clock, contact }
    };

    for round in 0..3u8 {
        let offer = Offer {
            message_ids: (0..3).map(|i| MessageId::new([round * 3 + i; 32])).collect(),
        };
        bob.db
            .with_write_txn(|txn| txn.receive_offer(bob.contact, &offer))
            .unwrap();
    }
    let request = bob
        .db
        .with_write_txn(|txn| txn.generate_request(bob.contact, 100))
        .unwrap()
        .unwrap();
    assert_eq!(request.message_ids.len(), 4);
}
