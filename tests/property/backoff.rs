//! Property tests for retransmission backoff and batch packing.
//!
//! Uses proptest to verify:
//! 1. Expiry never decreases as the transmission count grows.
//! 2. Expiry never exceeds `MAX_EXPIRY`, however large the inputs.
//! 3. A generated batch never exceeds its byte budget.
//!
//! Verification command: `cargo test --test backoff`

use std::sync::Arc;

use proptest::prelude::*;
use syncstore::{
    Database, DatabaseConfig, MAX_EXPIRY, SettableClock, calculate_expiry,
};
use syncstore_proto::identity::{Author, LocalAuthor};
use syncstore_proto::ids::{AuthorId, ClientId, ContactId, GroupId, MessageId, Timestamp};
use syncstore_proto::message::{Group, Message, Metadata, Visibility};

const NOW: u64 = 1_000_000;

fn author(n: u8) -> Author {
    Author {
        id: AuthorId::new([n; 32]),
        name: format!("author-{n}"),
        public_key: vec![n; 32],
    }
}

/// An open store with one contact that can see one shared group.
fn store_with_contact() -> (Database, ContactId, GroupId) {
    let db = Database::new(DatabaseConfig::default())
        .unwrap()
        .with_clock(Arc::new(SettableClock::new(NOW)));
    db.open().unwrap();
    let group = Group {
        id: GroupId::new([7; 32]),
        client_id: ClientId::new("backoff"),
        descriptor: Vec::new(),
    };
    let c = db
        .with_write_txn(|txn| {
            txn.add_local_author(&LocalAuthor {
                author: author(1),
                private_key: vec![0; 32],
                created: Timestamp::from_millis(0),
            })?;
            let c = txn.add_contact(&author(2), AuthorId::new([1; 32]), true, true)?;
            txn.add_group(&group)?;
            txn.set_group_visibility(c, &group.id, Visibility::Shared)?;
            Ok(c)
        })
        .unwrap();
    (db, c, group.id)
}

proptest! {
    #[test]
    fn expiry_is_monotonic_in_tx_count(
        now in 0u64..=1 << 50,
        latency in any::<u32>(),
        tx in 0u32..70,
    ) {
        prop_assert!(calculate_expiry(now, latency, tx) <= calculate_expiry(now, latency, tx + 1));
    }

    #[test]
    fn expiry_saturates_instead_of_wrapping(
        now in any::<u64>(),
        latency in any::<u32>(),
        tx in any::<u32>(),
    ) {
        let expiry = calculate_expiry(now.min(MAX_EXPIRY), latency, tx);
        prop_assert!(expiry <= MAX_EXPIRY);
        prop_assert!(expiry >= now.min(MAX_EXPIRY));
    }

    #[test]
    fn first_transmission_waits_one_round_trip(now in 0u64..=1 << 40, latency in any::<u32>()) {
        prop_assert_eq!(calculate_expiry(now, latency, 0), now + 2 * u64::from(latency));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn batch_never_exceeds_budget(
        sizes in prop::collection::vec(1usize..4096, 1..12),
        budget in 0usize..16_384,
    ) {
        let (db, c, g) = store_with_contact();
        db.with_write_txn(|txn| {
            for (i, size) in sizes.iter().enumerate() {
                let n = u8::try_from(i).unwrap();
                let m = Message {
                    id: MessageId::new([n; 32]),
                    group_id: g,
                    timestamp: Timestamp::from_millis(u64::from(n)),
                    raw: vec![n; *size],
                };
                txn.add_local_message(&m, &Metadata::new(), true)?;
            }
            Ok(())
        })
        .unwrap();

        let batch = db
            .with_write_txn(|txn| txn.generate_batch(c, budget, 1_000))
            .unwrap()
            .unwrap_or_default();
        let total: usize = batch.iter().map(Vec::len).sum();
        prop_assert!(total <= budget);
        if let Some(first) = sizes.first() {
            prop_assert_eq!(batch.is_empty(), *first > budget);
        }
    }
}

#[test]
fn documented_schedule() {
    assert_eq!(calculate_expiry(1000, 100, 0), 1200);
    assert_eq!(calculate_expiry(1000, 100, 1), 1400);
    assert_eq!(calculate_expiry(1000, 100, 2), 1800);
    assert_eq!(calculate_expiry(1000, 100, 64), MAX_EXPIRY);
    assert_eq!(calculate_expiry(MAX_EXPIRY, 1, 0), MAX_EXPIRY);
}
