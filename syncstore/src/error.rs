//! Error type for every store operation.

use thiserror::Error;

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A referenced entity does not exist. The caller can recover.
    NotFound,
    /// The call was rejected before anything was changed.
    InvalidArgument,
    /// The transaction cannot continue and must be aborted.
    Storage,
}

/// Errors returned by the store.
#[derive(Debug, Error)]
pub enum DbError {
    /// No contact with the given id.
    #[error("no such contact")]
    NoSuchContact,
    /// No group with the given id.
    #[error("no such group")]
    NoSuchGroup,
    /// No message with the given id.
    #[error("no such message")]
    NoSuchMessage,
    /// No transport with the given id.
    #[error("no such transport")]
    NoSuchTransport,
    /// No local author with the given id.
    #[error("no such local author")]
    NoSuchLocalAuthor,

    /// A mutating call was made on a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnlyTransaction,
    /// The arguments describe an illegal operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The stored data contradicts an internal invariant, e.g. a query that
    /// must match exactly one row matched none or several.
    #[error("database state error: {0}")]
    State(String),
    /// The underlying engine failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The stored schema is older than anything this code can migrate.
    #[error("stored schema is too old to migrate")]
    DataTooOld,
    /// The stored schema was written by newer, incompatible code.
    #[error("stored schema is newer than this code supports")]
    DataTooNew,
    /// The store is not open, or is closing.
    #[error("database is closed")]
    Closed,
    /// The calling thread already holds a transaction.
    #[error("thread already holds a transaction")]
    ReentrantTransaction,
}

impl DbError {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuchContact
            | Self::NoSuchGroup
            | Self::NoSuchMessage
            | Self::NoSuchTransport
            | Self::NoSuchLocalAuthor => ErrorKind::NotFound,
            Self::ReadOnlyTransaction | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::State(_)
            | Self::Sqlite(_)
            | Self::DataTooOld
            | Self::DataTooNew
            | Self::Closed
            | Self::ReentrantTransaction => ErrorKind::Storage,
        }
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = DbError> = std::result::Result<T, E>;
