//! Table and index definitions.
//!
//! DDL is written with engine-neutral type placeholders (`_HASH`, `_SECRET`,
//! `_BINARY`, `_COUNTER`, `_STRING`) and rendered once through a [`TypeMap`]
//! for the engine in use.

use rusqlite::Connection;

use crate::error::Result;

/// Schema version written by this code.
pub const CODE_SCHEMA_VERSION: u32 = 3;

/// Oldest schema version this code can migrate from.
pub const MIN_SCHEMA_VERSION: u32 = 1;

/// Settings namespace holding the store's own bookkeeping.
pub const DB_SETTINGS_NAMESPACE: &str = "db";

/// Settings key for the stored schema version.
pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// Settings key for the oldest code version able to read the store.
pub const MIN_SCHEMA_VERSION_KEY: &str = "minSchemaVersion";

/// Settings key that is `true` while the store is open.
pub const DIRTY_KEY: &str = "dirty";

/// Concrete column types for one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMap {
    /// 32-byte content hash.
    pub hash: &'static str,
    /// Key material.
    pub secret: &'static str,
    /// Arbitrary bytes.
    pub binary: &'static str,
    /// Auto-assigned integer key.
    pub counter: &'static str,
    /// Text.
    pub string: &'static str,
}

/// Types for the bundled SQLite engine.
///
/// `INTEGER` on a single-column primary key makes it a rowid alias, which
/// is what gives `_COUNTER` its auto-assignment.
pub const SQLITE_TYPES: TypeMap = TypeMap {
    hash: "BLOB",
    secret: "BLOB",
    binary: "BLOB",
    counter: "INTEGER",
    string: "TEXT",
};

impl TypeMap {
    /// Replaces every placeholder in `ddl` with this map's types.
    #[must_use]
    pub fn render(&self, ddl: &str) -> String {
        ddl.replace("_HASH", self.hash)
            .replace("_SECRET", self.secret)
            .replace("_BINARY", self.binary)
            .replace("_COUNTER", self.counter)
            .replace("_STRING", self.string)
    }
}

pub(crate) const CREATE_SETTINGS: &str = "CREATE TABLE settings
    (namespace _STRING NOT NULL,
     settingKey _STRING NOT NULL,
     value _STRING NOT NULL,
     PRIMARY KEY (namespace, settingKey))";

pub(crate) const CREATE_LOCAL_AUTHORS: &str = "CREATE TABLE localAuthors
    (authorId _HASH NOT NULL,
     name _STRING NOT NULL,
     publicKey _BINARY NOT NULL,
     privateKey _SECRET NOT NULL,
     created BIGINT NOT NULL,
     PRIMARY KEY (authorId))";

pub(crate) const CREATE_CONTACTS: &str = "CREATE TABLE contacts
    (contactId _COUNTER,
     authorId _HASH NOT NULL,
     name _STRING NOT NULL,
     publicKey _BINARY NOT NULL,
     localAuthorId _HASH NOT NULL,
     verified BOOLEAN NOT NULL,
     active BOOLEAN NOT NULL,
     PRIMARY KEY (contactId),
     FOREIGN KEY (localAuthorId)
       REFERENCES localAuthors (authorId)
       ON DELETE CASCADE)";

pub(crate) const CREATE_GROUPS: &str = "CREATE TABLE groups
    (groupId _HASH NOT NULL,
     clientId _STRING NOT NULL,
     descriptor _BINARY NOT NULL,
     PRIMARY KEY (groupId))";

pub(crate) const CREATE_GROUP_METADATA: &str = "CREATE TABLE groupMetadata
    (groupId _HASH NOT NULL,
     metaKey _STRING NOT NULL,
     value _BINARY NOT NULL,
     PRIMARY KEY (groupId, metaKey),
     FOREIGN KEY (groupId)
       REFERENCES groups (groupId)
       ON DELETE CASCADE)";

pub(crate) const CREATE_GROUP_VISIBILITIES: &str = "CREATE TABLE groupVisibilities
    (contactId INTEGER NOT NULL,
     groupId _HASH NOT NULL,
     shared BOOLEAN NOT NULL,
     PRIMARY KEY (contactId, groupId),
     FOREIGN KEY (contactId)
       REFERENCES contacts (contactId)
       ON DELETE CASCADE,
     FOREIGN KEY (groupId)
       REFERENCES groups (groupId)
       ON DELETE CASCADE)";

pub(crate) const CREATE_MESSAGES: &str = "CREATE TABLE messages
    (messageId _HASH NOT NULL,
     groupId _HASH NOT NULL,
     timestamp BIGINT NOT NULL,
     state INTEGER NOT NULL,
     shared BOOLEAN NOT NULL,
     length INTEGER NOT NULL,
     raw _BINARY,
     PRIMARY KEY (messageId),
     FOREIGN KEY (groupId)
       REFERENCES groups (groupId)
       ON DELETE CASCADE)";

pub(crate) const CREATE_MESSAGE_METADATA: &str = "CREATE TABLE messageMetadata
    (messageId _HASH NOT NULL,
     groupId _HASH NOT NULL,
     state INTEGER NOT NULL,
     metaKey _STRING NOT NULL,
     value _BINARY NOT NULL,
     PRIMARY KEY (messageId, metaKey),
     FOREIGN KEY (messageId)
       REFERENCES messages (messageId)
       ON DELETE CASCADE,
     FOREIGN KEY (groupId)
       REFERENCES groups (groupId)
       ON DELETE CASCADE)";

// dependencyId is not a foreign key: the dependency may not have arrived.
pub(crate) const CREATE_MESSAGE_DEPENDENCIES: &str = "CREATE TABLE messageDependencies
    (groupId _HASH NOT NULL,
     messageId _HASH NOT NULL,
     dependencyId _HASH NOT NULL,
     PRIMARY KEY (messageId, dependencyId),
     FOREIGN KEY (groupId)
       REFERENCES groups (groupId)
       ON DELETE CASCADE,
     FOREIGN KEY (messageId)
       REFERENCES messages (messageId)
       ON DELETE CASCADE)";

// messageId is not a foreign key: offered messages are not held yet.
pub(crate) const CREATE_OFFERS: &str = "CREATE TABLE offers
    (messageId _HASH NOT NULL,
     contactId INTEGER NOT NULL,
     PRIMARY KEY (messageId, contactId),
     FOREIGN KEY (contactId)
       REFERENCES contacts (contactId)
       ON DELETE CASCADE)";

pub(crate) const CREATE_STATUSES: &str = "CREATE TABLE statuses
    (messageId _HASH NOT NULL,
     contactId INTEGER NOT NULL,
     ack BOOLEAN NOT NULL,
     seen BOOLEAN NOT NULL,
     requested BOOLEAN NOT NULL,
     expiry BIGINT NOT NULL,
     txCount INTEGER NOT NULL,
     PRIMARY KEY (messageId, contactId),
     FOREIGN KEY (messageId)
       REFERENCES messages (messageId)
       ON DELETE CASCADE,
     FOREIGN KEY (contactId)
       REFERENCES contacts (contactId)
       ON DELETE CASCADE)";

pub(crate) const CREATE_TRANSPORTS: &str = "CREATE TABLE transports
    (transportId _STRING NOT NULL,
     maxLatency INTEGER NOT NULL,
     PRIMARY KEY (transportId))";

pub(crate) const CREATE_INCOMING_KEYS: &str = "CREATE TABLE incomingKeys
    (contactId INTEGER NOT NULL,
     transportId _STRING NOT NULL,
     period BIGINT NOT NULL,
     tagKey _SECRET NOT NULL,
     headerKey _SECRET NOT NULL,
     base BIGINT NOT NULL,
     bitmap _BINARY NOT NULL,
     PRIMARY KEY (contactId, transportId, period),
     FOREIGN KEY (contactId)
       REFERENCES contacts (contactId)
       ON DELETE CASCADE,
     FOREIGN KEY (transportId)
       REFERENCES transports (transportId)
       ON DELETE CASCADE)";

pub(crate) const CREATE_OUTGOING_KEYS: &str = "CREATE TABLE outgoingKeys
    (contactId INTEGER NOT NULL,
     transportId _STRING NOT NULL,
     period BIGINT NOT NULL,
     tagKey _SECRET NOT NULL,
     headerKey _SECRET NOT NULL,
     stream BIGINT NOT NULL,
     PRIMARY KEY (contactId, transportId),
     FOREIGN KEY (contactId)
       REFERENCES contacts (contactId)
       ON DELETE CASCADE,
     FOREIGN KEY (transportId)
       REFERENCES transports (transportId)
       ON DELETE CASCADE)";

const TABLES: &[&str] = &[
    CREATE_SETTINGS,
    CREATE_LOCAL_AUTHORS,
    CREATE_CONTACTS,
    CREATE_GROUPS,
    CREATE_GROUP_METADATA,
    CREATE_GROUP_VISIBILITIES,
    CREATE_MESSAGES,
    CREATE_MESSAGE_METADATA,
    CREATE_MESSAGE_DEPENDENCIES,
    CREATE_OFFERS,
    CREATE_STATUSES,
    CREATE_TRANSPORTS,
    CREATE_INCOMING_KEYS,
    CREATE_OUTGOING_KEYS,
];

pub(crate) const INDEX_CONTACTS_BY_AUTHOR_ID: &str =
    "CREATE INDEX IF NOT EXISTS contactsByAuthorId ON contacts (authorId)";

pub(crate) const INDEX_GROUPS_BY_CLIENT_ID: &str =
    "CREATE INDEX IF NOT EXISTS groupsByClientId ON groups (clientId)";

pub(crate) const INDEX_MESSAGE_METADATA_BY_GROUP_ID_STATE: &str =
    "CREATE INDEX IF NOT EXISTS messageMetadataByGroupIdState ON messageMetadata (groupId, state)";

pub(crate) const INDEX_MESSAGE_DEPENDENCIES_BY_DEPENDENCY_ID: &str =
    "CREATE INDEX IF NOT EXISTS messageDependenciesByDependencyId ON messageDependencies (dependencyId)";

pub(crate) const INDEX_MESSAGES_BY_GROUP_ID_TIMESTAMP: &str =
    "CREATE INDEX IF NOT EXISTS messagesByGroupIdTimestamp ON messages (groupId, timestamp)";

pub(crate) const INDEX_STATUSES_BY_CONTACT_ID: &str =
    "CREATE INDEX IF NOT EXISTS statusesByContactId ON statuses (contactId)";

const INDEXES: &[&str] = &[
    INDEX_CONTACTS_BY_AUTHOR_ID,
    INDEX_GROUPS_BY_CLIENT_ID,
    INDEX_MESSAGE_METADATA_BY_GROUP_ID_STATE,
    INDEX_MESSAGE_DEPENDENCIES_BY_DEPENDENCY_ID,
    INDEX_MESSAGES_BY_GROUP_ID_TIMESTAMP,
    INDEX_STATUSES_BY_CONTACT_ID,
];

/// Creates every table of the current schema.
pub(crate) fn create_tables(conn: &Connection, types: &TypeMap) -> Result<()> {
    for ddl in TABLES {
        conn.execute_batch(&types.render(ddl))?;
    }
    tracing::debug!(tables = TABLES.len(), "created tables");
    Ok(())
}

/// Creates any missing index. Safe to run on every open.
pub(crate) fn create_indexes(conn: &Connection) -> Result<()> {
    for ddl in INDEXES {
        conn.execute_batch(ddl)?;
    }
    Ok(())
}

/// Whether the store has been initialised, judged by the settings table.
pub(crate) fn has_settings_table(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'settings'",
        [],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}
