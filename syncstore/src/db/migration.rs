//! Schema version policy and the migration chain.
//!
//! A new store is created at [`CODE_SCHEMA_VERSION`] and stamped with it. A
//! reopened store is compared against the running code and brought up to
//! date by applying, in order, each [`Migration`] whose start version matches
//! the stored one. Everything runs inside the open transaction, so a failed
//! step leaves the store as it was.

use rusqlite::Connection;
use syncstore_proto::message::Settings;

use super::schema::{
    self, CODE_SCHEMA_VERSION, DB_SETTINGS_NAMESPACE, MIN_SCHEMA_VERSION, MIN_SCHEMA_VERSION_KEY,
    SCHEMA_VERSION_KEY, TypeMap,
};
use super::settings;
use crate::error::{DbError, Result};

/// One step of the chain, from `start` to `end`.
#[derive(Clone, Copy)]
pub struct Migration {
    pub start: u32,
    pub end: u32,
    pub migrate: fn(&Connection, &TypeMap) -> Result<()>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Migration({} -> {})", self.start, self.end)
    }
}

/// Decides whether a stored schema can be opened and upgrades it.
#[derive(Debug, Clone)]
pub struct SchemaMigrator {
    code_version: u32,
    min_version: u32,
    migrations: Vec<Migration>,
}

impl Default for SchemaMigrator {
    fn default() -> Self {
        Self::new(
            CODE_SCHEMA_VERSION,
            MIN_SCHEMA_VERSION,
            vec![
                Migration { start: 1, end: 2, migrate: migrate_1_2 },
                Migration { start: 2, end: 3, migrate: migrate_2_3 },
            ],
        )
    }
}

impl SchemaMigrator {
    /// A migrator for code at `code_version` that can upgrade stores from
    /// `min_version` onwards using `migrations`.
    #[must_use]
    pub const fn new(code_version: u32, min_version: u32, migrations: Vec<Migration>) -> Self {
        Self { code_version, min_version, migrations }
    }

    #[must_use]
    pub const fn code_version(&self) -> u32 {
        self.code_version
    }

    #[must_use]
    pub const fn min_version(&self) -> u32 {
        self.min_version
    }

    /// Records the versions of a freshly created store.
    pub(crate) fn stamp(&self, conn: &Connection) -> Result<()> {
        let mut s = Settings::new();
        s.insert(SCHEMA_VERSION_KEY.to_string(), self.code_version.to_string());
        s.insert(MIN_SCHEMA_VERSION_KEY.to_string(), self.min_version.to_string());
        settings::merge(conn, &s, DB_SETTINGS_NAMESPACE)?;
        Ok(())
    }

    /// Brings a reopened store up to the code version.
    ///
    /// Returns whether any migration ran. `stored` is the store's `db`
    /// settings namespace as read at open.
    ///
    /// # Errors
    ///
    /// [`DbError::DataTooNew`] if the store needs newer code,
    /// [`DbError::DataTooOld`] if no chain reaches the code version, and
    /// [`DbError::State`] if the stored version is missing or malformed.
    pub(crate) fn migrate(
        &self,
        conn: &Connection,
        types: &TypeMap,
        stored: &Settings,
    ) -> Result<bool> {
        let mut version = read_version(stored, SCHEMA_VERSION_KEY)?
            .ok_or_else(|| DbError::state("stored schema version is missing"))?;
        if version == self.code_version {
            return Ok(false);
        }
        if version > self.code_version {
            let readable_by = read_version(stored, MIN_SCHEMA_VERSION_KEY)?;
            if readable_by.is_some_and(|min| min <= self.code_version) {
                tracing::info!(
                    stored = version,
                    code = self.code_version,
                    "opening newer schema that is declared compatible"
                );
                return Ok(false);
            }
            tracing::error!(stored = version, code = self.code_version, "schema too new");
            return Err(DbError::DataTooNew);
        }
        if version < self.min_version {
            tracing::error!(stored = version, min = self.min_version, "schema too old");
            return Err(DbError::DataTooOld);
        }
        for m in &self.migrations {
            if m.start != version {
                continue;
            }
            tracing::info!(from = m.start, to = m.end, "migrating schema");
            (m.migrate)(conn, types)?;
            store_version(conn, m.end)?;
            version = m.end;
        }
        if version != self.code_version {
            tracing::error!(reached = version, code = self.code_version, "no migration path");
            return Err(DbError::DataTooOld);
        }
        Ok(true)
    }
}

fn read_version(stored: &Settings, key: &str) -> Result<Option<u32>> {
    stored
        .get(key)
        .map(|v| {
            v.parse()
                .map_err(|_| DbError::state(format!("malformed {key}: {v:?}")))
        })
        .transpose()
}

fn store_version(conn: &Connection, version: u32) -> Result<()> {
    let mut s = Settings::new();
    s.insert(SCHEMA_VERSION_KEY.to_string(), version.to_string());
    settings::merge(conn, &s, DB_SETTINGS_NAMESPACE)?;
    Ok(())
}

/// Adds the message dependency table.
fn migrate_1_2(conn: &Connection, types: &TypeMap) -> Result<()> {
    conn.execute_batch(&types.render(schema::CREATE_MESSAGE_DEPENDENCIES))?;
    conn.execute_batch(schema::INDEX_MESSAGE_DEPENDENCIES_BY_DEPENDENCY_ID)?;
    Ok(())
}

/// Adds the contact active flag and copies each message's group and state
/// onto its metadata rows.
fn migrate_2_3(conn: &Connection, types: &TypeMap) -> Result<()> {
    conn.execute_batch(
        "ALTER TABLE contacts ADD COLUMN active BOOLEAN NOT NULL DEFAULT TRUE;
         ALTER TABLE messageMetadata RENAME TO messageMetadataOld;",
    )?;
    conn.execute_batch(&types.render(schema::CREATE_MESSAGE_METADATA))?;
    let copied = conn.execute(
        "INSERT INTO messageMetadata (messageId, groupId, state, metaKey, value)
         SELECT mm.messageId, m.groupId, m.state, mm.metaKey, mm.value
         FROM messageMetadataOld AS mm
         JOIN messages AS m ON m.messageId = mm.messageId",
        [],
    )?;
    conn.execute_batch("DROP TABLE messageMetadataOld")?;
    conn.execute_batch(schema::INDEX_MESSAGE_METADATA_BY_GROUP_ID_STATE)?;
    tracing::debug!(rows = copied, "backfilled message metadata");
    Ok(())
}
