//! `SyncStore`: transactional message store and gossip sync engine.
//!
//! A [`Database`] keeps contacts, groups, messages and their per-contact
//! delivery status in an embedded SQLite file, and turns that status into the
//! Offer/Request/Ack/Batch records exchanged with peers. All access goes
//! through a [`Transaction`]; changes are announced on the [`EventBus`] once
//! they have committed.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod event;

pub use clock::{Clock, SettableClock, SystemClock};
pub use config::DatabaseConfig;
pub use db::{
    Database, MAX_EXPIRY, Migration, SchemaMigrator, Transaction, TypeMap, calculate_expiry,
};
pub use error::{DbError, ErrorKind, Result};
pub use event::{Event, EventBus, EventListener};
