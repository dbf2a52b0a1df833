//! The transaction handle threaded through every store operation.

use std::cell::RefCell;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use rusqlite::Connection;

use super::Database;
use crate::error::{DbError, Result};
use crate::event::Event;

thread_local! {
    /// Ids of the databases the current thread holds a transaction on.
    static HELD: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

pub(super) fn holds_transaction(db_id: u64) -> bool {
    HELD.with(|h| h.borrow().contains(&db_id))
}

fn mark_held(db_id: u64) {
    HELD.with(|h| h.borrow_mut().push(db_id));
}

fn clear_held(db_id: u64) {
    HELD.with(|h| {
        let mut held = h.borrow_mut();
        if let Some(pos) = held.iter().position(|id| *id == db_id) {
            held.swap_remove(pos);
        }
    });
}

pub(super) enum LockGuard<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// An open transaction on a [`Database`].
///
/// Holds the store's global lock (shared for read-only transactions,
/// exclusive otherwise) and a pooled connection with an open engine
/// transaction. Dropping it without committing rolls back, returns the
/// connection and releases the lock, whatever the exit path.
///
/// Events recorded by mutations are delivered by [`Database::end`] only if
/// the transaction committed.
pub struct Transaction<'a> {
    db: &'a Database,
    conn: Option<Connection>,
    guard: Option<LockGuard<'a>>,
    read_only: bool,
    committed: bool,
    events: Vec<Event>,
}

impl<'a> Transaction<'a> {
    /// Begins an engine transaction on `conn`. The caller has already taken
    /// the lock and checked reentrancy.
    pub(super) fn begin(
        db: &'a Database,
        conn: Connection,
        guard: LockGuard<'a>,
        read_only: bool,
    ) -> Result<Self> {
        mark_held(db.id);
        let mut txn = Self {
            db,
            conn: None,
            guard: Some(guard),
            read_only,
            committed: false,
            events: Vec::new(),
        };
        match conn.execute_batch("BEGIN") {
            Ok(()) => {
                txn.conn = Some(conn);
                Ok(txn)
            }
            Err(e) => {
                db.pool.discard(conn);
                Err(e.into())
            }
        }
    }

    /// Whether mutations are rejected.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether [`Database::commit`] has succeeded on this transaction.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(super) fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(DbError::InvalidArgument(
                "transaction already committed".into(),
            ));
        }
        self.conn()?.execute_batch("COMMIT")?;
        self.committed = true;
        Ok(())
    }

    /// Takes the outcome and buffered events, leaving the handle to be
    /// dropped.
    pub(super) fn finish(&mut self) -> (bool, Vec<Event>) {
        (self.committed, std::mem::take(&mut self.events))
    }

    pub(crate) const fn db(&self) -> &'a Database {
        self.db
    }

    pub(crate) fn now(&self) -> u64 {
        self.db.clock.now_millis()
    }

    /// The connection, for reads.
    pub(crate) fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(DbError::Closed)
    }

    /// The connection and event buffer, for mutations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ReadOnlyTransaction`] on a read-only transaction.
    pub(crate) fn write_parts(&mut self) -> Result<(&Connection, &mut Vec<Event>)> {
        if self.read_only {
            return Err(DbError::ReadOnlyTransaction);
        }
        let conn = self.conn.as_ref().ok_or(DbError::Closed)?;
        Ok((conn, &mut self.events))
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.committed {
                self.db.pool.release(conn);
            } else {
                match conn.execute_batch("ROLLBACK") {
                    Ok(()) => {
                        tracing::debug!(read_only = self.read_only, "transaction aborted");
                        self.db.pool.release(conn);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "rollback failed");
                        self.db.pool.discard(conn);
                    }
                }
            }
        }
        self.guard = None;
        clear_held(self.db.id);
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("read_only", &self.read_only)
            .field("committed", &self.committed)
            .field("events", &self.events.len())
            .finish_non_exhaustive()
    }
}
