//! Time source used for retransmission expiry.

use std::sync::atomic::{AtomicU64, Ordering};

use syncstore_proto::ids::Timestamp;

/// Supplies the current time in milliseconds since the UNIX epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now_millis(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        Timestamp::now().as_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct SettableClock {
    now: AtomicU64,
}

impl SettableClock {
    /// Creates a clock reading `now`.
    #[must_use]
    pub const fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Moves the clock forward by `millis`, saturating.
    pub fn advance(&self, millis: u64) {
        let now = self.now.load(Ordering::SeqCst);
        self.now.store(now.saturating_add(millis), Ordering::SeqCst);
    }
}

impl Clock for SettableClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
