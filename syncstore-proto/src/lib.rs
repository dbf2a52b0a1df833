//! Data model and sync record definitions shared by `SyncStore` crates.

pub mod codec;
pub mod identity;
pub mod ids;
pub mod keys;
pub mod message;
pub mod record;
