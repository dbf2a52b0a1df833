//! Store configuration.

use std::path::PathBuf;

/// Default cap on offered-but-not-held messages per contact.
pub const DEFAULT_MAX_OFFERED_MESSAGES: usize = 1000;

/// Default number of idle connections kept by the pool.
pub const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 8;

/// Settings for opening a [`Database`](crate::Database).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// SQLite file to open or create. `None` keeps the store in memory for
    /// the lifetime of the `Database`.
    pub path: Option<PathBuf>,
    /// Offers from one contact beyond this count are dropped.
    pub max_offered_messages: usize,
    /// Idle connections kept for reuse. Busy connections are not limited.
    pub max_idle_connections: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_offered_messages: DEFAULT_MAX_OFFERED_MESSAGES,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a file-backed store with default limits.
    #[must_use]
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }
}
