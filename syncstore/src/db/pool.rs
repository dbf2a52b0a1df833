//! Pool of SQLite connections to one store.
//!
//! Connections are created on demand and kept for reuse up to an idle cap.
//! Closing the pool stops handing out connections, closes the idle ones and
//! then waits until every connection in use has been given back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, OpenFlags};

use crate::error::{DbError, Result};

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where connections point.
#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    /// Named shared-cache in-memory database.
    Memory(String),
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Connection>,
    /// Connections created and not yet closed, idle or in use.
    open: usize,
    closed: bool,
}

pub(crate) struct ConnectionPool {
    source: Source,
    max_idle: usize,
    state: Mutex<PoolState>,
    changed: Condvar,
    /// Holds an in-memory database alive while every pooled connection is
    /// busy or closed.
    keep_alive: Mutex<Option<Connection>>,
}

impl ConnectionPool {
    /// Creates a pool for a file, or for a fresh in-memory store if `path`
    /// is `None`.
    pub(crate) fn new(path: Option<PathBuf>, max_idle: usize) -> Result<Self> {
        let (source, keep_alive) = match path {
            Some(p) => (Source::File(p), None),
            None => {
                let n = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
                let uri = format!(
                    "file:syncstore-{}-{n}?mode=memory&cache=shared",
                    std::process::id()
                );
                let source = Source::Memory(uri);
                let keeper = Self::connect(&source)?;
                (source, Some(keeper))
            }
        };
        Ok(Self {
            source,
            max_idle,
            state: Mutex::new(PoolState::default()),
            changed: Condvar::new(),
            keep_alive: Mutex::new(keep_alive),
        })
    }

    fn connect(source: &Source) -> Result<Connection> {
        let conn = match source {
            Source::File(path) => Connection::open(path)?,
            Source::Memory(uri) => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    /// Takes an idle connection or opens a new one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] after [`close`](Self::close), or the
    /// engine error if a new connection cannot be opened.
    pub(crate) fn acquire(&self) -> Result<Connection> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DbError::Closed);
        }
        if let Some(conn) = state.idle.pop() {
            return Ok(conn);
        }
        // Count the connection before opening it so close() waits for it.
        state.open += 1;
        drop(state);
        match Self::connect(&self.source) {
            Ok(conn) => {
                tracing::trace!("opened pooled connection");
                Ok(conn)
            }
            Err(e) => {
                self.forget_one();
                Err(e)
            }
        }
    }

    /// Returns a healthy connection to the pool.
    pub(crate) fn release(&self, conn: Connection) {
        let mut state = self.state.lock();
        if state.closed || state.idle.len() >= self.max_idle {
            state.open = state.open.saturating_sub(1);
            drop(state);
            close_quietly(conn);
        } else {
            state.idle.push(conn);
        }
        self.changed.notify_all();
    }

    /// Drops a connection that may be in a bad state instead of reusing it.
    pub(crate) fn discard(&self, conn: Connection) {
        tracing::warn!("discarding pooled connection");
        close_quietly(conn);
        self.forget_one();
    }

    fn forget_one(&self) {
        let mut state = self.state.lock();
        state.open = state.open.saturating_sub(1);
        self.changed.notify_all();
    }

    /// Stops handing out connections and waits for all of them to close.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let idle = std::mem::take(&mut state.idle);
        state.open = state.open.saturating_sub(idle.len());
        for conn in idle {
            close_quietly(conn);
        }
        while state.open > 0 {
            tracing::debug!(open = state.open, "waiting for connections to be returned");
            // Spurious wakeups just re-check the count.
            self.changed.wait(&mut state);
        }
        drop(state);
        if let Some(conn) = self.keep_alive.lock().take() {
            close_quietly(conn);
        }
    }

    #[cfg(test)]
    fn open_connections(&self) -> usize {
        self.state.lock().open
    }
}

fn close_quietly(conn: Connection) {
    if let Err((_, e)) = conn.close() {
        tracing::warn!(error = %e, "error closing connection");
    }
}
