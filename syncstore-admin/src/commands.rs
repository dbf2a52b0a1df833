//! The operations behind each subcommand.

use std::io::Write;

use syncstore::db::schema::{DB_SETTINGS_NAMESPACE, SCHEMA_VERSION_KEY};
use syncstore::{Database, DatabaseConfig, DbError};

use crate::config::Command;

/// Errors from running a command.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// The store could not be opened or queried.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Output or directory creation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Opens the store described by `config`, runs `command` against it and
/// writes a human-readable report to `out`. The store is closed cleanly
/// afterwards.
///
/// # Errors
///
/// Returns [`AdminError`] if the store cannot be opened, migrated or read,
/// or if writing the report fails.
pub fn run(command: &Command, config: &DatabaseConfig, out: &mut impl Write) -> Result<(), AdminError> {
    if let Some(parent) = config.path.as_deref().and_then(std::path::Path::parent) {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(config.clone())?;
    let reopened = db.open()?;
    if db.was_dirty_on_initialisation() {
        writeln!(out, "warning: store was not closed cleanly")?;
    }
    let result = match command {
        Command::Open => {
            let status = if reopened { "opened" } else { "created" };
            writeln!(out, "{status} store at schema version {}", db_version(&db)?)?;
            Ok(())
        }
        Command::Info => info(&db, out),
        Command::Settings { namespace } => dump_settings(&db, namespace, out),
    };
    db.close()?;
    result
}

fn db_version(db: &Database) -> Result<String, DbError> {
    let settings = db.with_read_txn(|txn| txn.get_settings(DB_SETTINGS_NAMESPACE))?;
    Ok(settings
        .get(SCHEMA_VERSION_KEY)
        .cloned()
        .unwrap_or_else(|| "unknown".to_string()))
}

fn info(db: &Database, out: &mut impl Write) -> Result<(), AdminError> {
    let version = db_version(db)?;
    let (authors, contacts, transports) = db.with_read_txn(|txn| {
        Ok((
            txn.get_local_authors()?.len(),
            txn.get_contacts()?.len(),
            txn.get_transport_latencies()?,
        ))
    })?;
    tracing::debug!(authors, contacts, "read store summary");
    writeln!(out, "schema version: {version}")?;
    writeln!(out, "local authors:  {authors}")?;
    writeln!(out, "contacts:       {contacts}")?;
    writeln!(out, "transports:     {}", transports.len())?;
    for (id, latency) in &transports {
        writeln!(out, "  {id} (max latency {latency} ms)")?;
    }
    Ok(())
}

fn dump_settings(db: &Database, namespace: &str, out: &mut impl Write) -> Result<(), AdminError> {
    let settings = db.with_read_txn(|txn| txn.get_settings(namespace))?;
    if settings.is_empty() {
        writeln!(out, "no settings in namespace {namespace:?}")?;
    }
    for (key, value) in &settings {
        writeln!(out, "{key} = {value}")?;
    }
    Ok(())
}
