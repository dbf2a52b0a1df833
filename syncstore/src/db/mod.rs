//! The transactional store.
//!
//! [`Database`] owns the connection pool, the global read/write lock and the
//! event bus. Every operation runs inside a [`Transaction`]:
//!
//! ```no_run
//! # use syncstore::{Database, DatabaseConfig, DbError};
//! # fn demo() -> Result<(), DbError> {
//! let db = Database::new(DatabaseConfig::default())?;
//! db.open()?;
//! let contacts = db.with_read_txn(|txn| txn.get_contacts())?;
//! db.close()?;
//! # Ok(()) }
//! ```
//!
//! Operations are grouped by concern in the submodules, each adding methods
//! to [`Transaction`].

mod groups;
mod identity;
mod messages;
pub mod migration;
mod pool;
pub mod schema;
mod settings;
mod status;
mod sync;
mod transaction;
mod transport;
mod visibility;
pub(crate) mod row;
#[cfg(test)]
mod test_util;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use syncstore_proto::message::Settings;

pub use migration::{Migration, SchemaMigrator};
pub use schema::TypeMap;
pub use status::{MAX_EXPIRY, calculate_expiry};
pub use transaction::Transaction;

use self::pool::ConnectionPool;
use self::schema::{DB_SETTINGS_NAMESPACE, DIRTY_KEY};
use self::transaction::LockGuard;
use crate::clock::{Clock, SystemClock};
use crate::config::DatabaseConfig;
use crate::error::{DbError, Result};
use crate::event::EventBus;

static NEXT_DATABASE_ID: AtomicU64 = AtomicU64::new(0);

/// A message/status store with a single-writer, multi-reader lock.
pub struct Database {
    id: u64,
    config: DatabaseConfig,
    pool: ConnectionPool,
    lock: RwLock<()>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    migrator: SchemaMigrator,
    types: TypeMap,
    open: AtomicBool,
    closed: AtomicBool,
    dirty_on_open: AtomicBool,
}

impl Database {
    /// Creates a store handle. Nothing is read or written until
    /// [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlite`] if an in-memory store cannot be created.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        let pool = ConnectionPool::new(config.path.clone(), config.max_idle_connections)?;
        Ok(Self {
            id: NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            pool,
            lock: RwLock::new(()),
            clock: Arc::new(SystemClock),
            events: Arc::new(EventBus::new()),
            migrator: SchemaMigrator::default(),
            types: schema::SQLITE_TYPES,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dirty_on_open: AtomicBool::new(false),
        })
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shares an event bus with other components.
    #[must_use]
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the schema version policy and migration chain.
    #[must_use]
    pub fn with_migrator(mut self, migrator: SchemaMigrator) -> Self {
        self.migrator = migrator;
        self
    }

    /// The bus committed events are delivered on.
    #[must_use]
    pub const fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The configuration the store was created with.
    #[must_use]
    pub const fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Whether the previous session ended without [`close`](Self::close).
    #[must_use]
    pub fn was_dirty_on_initialisation(&self) -> bool {
        self.dirty_on_open.load(Ordering::SeqCst)
    }

    /// Creates or reopens the store, migrating an older schema.
    ///
    /// Returns `true` if an existing store was reopened, `false` if a new one
    /// was created. Creation or migration happens in a single engine
    /// transaction; if any step fails nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::DataTooOld`] or [`DbError::DataTooNew`] if the
    /// stored schema is incompatible, [`DbError::Closed`] if the store was
    /// closed, or an engine error.
    pub fn open(&self) -> Result<bool> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Closed);
        }
        if self.open.load(Ordering::SeqCst) {
            return Err(DbError::InvalidArgument("database already open".into()));
        }
        let _guard = self.lock.write();
        let conn = self.pool.acquire()?;
        let result = self.open_with(&conn);
        match result {
            Ok(reopened) => {
                self.pool.release(conn);
                self.open.store(true, Ordering::SeqCst);
                tracing::info!(
                    reopened,
                    version = self.migrator.code_version(),
                    path = ?self.config.path,
                    "database open"
                );
                Ok(reopened)
            }
            Err(e) => {
                if conn.execute_batch("ROLLBACK").is_ok() {
                    self.pool.release(conn);
                } else {
                    self.pool.discard(conn);
                }
                tracing::error!(error = %e, "failed to open database");
                Err(e)
            }
        }
    }

    fn open_with(&self, conn: &rusqlite::Connection) -> Result<bool> {
        conn.execute_batch("BEGIN")?;
        let reopened = schema::has_settings_table(conn)?;
        if reopened {
            let stored = settings::get(conn, DB_SETTINGS_NAMESPACE)?;
            self.migrator.migrate(conn, &self.types, &stored)?;
            let dirty = stored.get(DIRTY_KEY).is_some_and(|v| v == "true");
            self.dirty_on_open.store(dirty, Ordering::SeqCst);
            if dirty {
                tracing::warn!("database was not closed cleanly");
            }
        } else {
            schema::create_tables(conn, &self.types)?;
            self.migrator.stamp(conn)?;
            tracing::info!(
                version = self.migrator.code_version(),
                "created database schema"
            );
        }
        schema::create_indexes(conn)?;
        set_dirty(conn, true)?;
        conn.execute_batch("COMMIT")?;
        Ok(reopened)
    }

    /// Starts a transaction, blocking until the lock is available.
    ///
    /// Read-only transactions share the lock; others hold it exclusively.
    /// The lock is fair, so a waiting writer is not starved by a stream of
    /// readers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReentrantTransaction`] if this thread already holds
    /// a transaction on this store, [`DbError::Closed`] if the store is not
    /// open, or an engine error.
    pub fn start_transaction(&self, read_only: bool) -> Result<Transaction<'_>> {
        if transaction::holds_transaction(self.id) {
            tracing::error!(read_only, "reentrant transaction attempt");
            return Err(DbError::ReentrantTransaction);
        }
        if !self.is_accepting() {
            return Err(DbError::Closed);
        }
        let guard = if read_only {
            LockGuard::Read(self.lock.read())
        } else {
            LockGuard::Write(self.lock.write())
        };
        // close() may have run while this thread waited for the lock.
        if !self.is_accepting() {
            return Err(DbError::Closed);
        }
        let conn = self.pool.acquire()?;
        Transaction::begin(self, conn, guard, read_only)
    }

    fn is_accepting(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Commits the engine transaction. Events are held until
    /// [`end`](Self::end).
    ///
    /// # Errors
    ///
    /// Returns an engine error if the commit fails, in which case the
    /// transaction will be rolled back by `end`.
    pub fn commit(&self, txn: &mut Transaction<'_>) -> Result<()> {
        txn.commit()
    }

    /// Ends a transaction: rolls back if it was not committed, returns the
    /// connection, releases the lock and then, only if it committed,
    /// delivers its events on this thread.
    pub fn end(&self, mut txn: Transaction<'_>) {
        let (committed, events) = txn.finish();
        drop(txn);
        if committed {
            for event in &events {
                self.events.broadcast(event);
            }
        }
    }

    /// Runs `f` in a read-only transaction and commits it.
    ///
    /// # Errors
    ///
    /// Returns the first error from starting the transaction, from `f`, or
    /// from committing.
    pub fn with_read_txn<R>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R>) -> Result<R> {
        let mut txn = self.start_transaction(true)?;
        let result = f(&txn).and_then(|r| {
            self.commit(&mut txn)?;
            Ok(r)
        });
        self.end(txn);
        result
    }

    /// Runs `f` in a read-write transaction, committing if it returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the first error from starting the transaction, from `f`, or
    /// from committing. On error nothing is persisted and no events are
    /// delivered.
    pub fn with_write_txn<R>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut txn = self.start_transaction(false)?;
        let result = f(&mut txn).and_then(|r| {
            self.commit(&mut txn)?;
            Ok(r)
        });
        self.end(txn);
        result
    }

    /// Stops accepting transactions, waits for running ones to finish, marks
    /// the store clean and closes every connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReentrantTransaction`] if called while this thread
    /// holds a transaction, or an engine error if the clean marker cannot be
    /// written. The connections are closed either way.
    pub fn close(&self) -> Result<()> {
        if transaction::holds_transaction(self.id) {
            return Err(DbError::ReentrantTransaction);
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let guard = self.lock.write();
        let result = if self.open.load(Ordering::SeqCst) {
            self.mark_clean()
        } else {
            Ok(())
        };
        self.pool.close();
        drop(guard);
        tracing::info!("database closed");
        result
    }

    fn mark_clean(&self) -> Result<()> {
        let conn = self.pool.acquire()?;
        let result = conn
            .execute_batch("BEGIN")
            .map_err(DbError::from)
            .and_then(|()| set_dirty(&conn, false))
            .and_then(|()| conn.execute_batch("COMMIT").map_err(DbError::from));
        if result.is_err() && conn.execute_batch("ROLLBACK").is_err() {
            self.pool.discard(conn);
        } else {
            self.pool.release(conn);
        }
        result
    }
}

fn set_dirty(conn: &rusqlite::Connection, dirty: bool) -> Result<()> {
    let mut s = Settings::new();
    s.insert(DIRTY_KEY.to_string(), dirty.to_string());
    settings::merge(conn, &s, DB_SETTINGS_NAMESPACE)?;
    Ok(())
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "error closing database on drop");
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
