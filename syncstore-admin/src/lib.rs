//! `SyncStore` admin library.
//!
//! Configuration loading and the subcommands of the `syncstore-admin`
//! binary, exposed for tests.

pub mod commands;
pub mod config;
