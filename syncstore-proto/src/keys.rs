//! Transport key sets and their replay windows.
//!
//! For every (contact, transport) pair the store keeps three incoming key
//! sets, one per rotation period around "now" (previous, current, next), and
//! one outgoing key set for the current period. Key bytes are wiped from
//! memory when dropped.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ids::TransportId;

/// Length in bytes of a symmetric key.
pub const SECRET_KEY_LENGTH: usize = 32;

/// Number of stream numbers tracked by a replay window.
pub const REORDERING_WINDOW_SIZE: usize = 32;

/// Size of a replay window bitmap in bytes.
pub const REORDERING_WINDOW_BYTES: usize = REORDERING_WINDOW_SIZE / 8;

/// A symmetric key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECRET_KEY_LENGTH]);

impl SecretKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn new(bytes: [u8; SECRET_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = crate::ids::InvalidIdLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; SECRET_KEY_LENGTH]>::try_from(bytes)
            .map(Self)
            .map_err(|_| crate::ids::InvalidIdLength {
                expected: SECRET_KEY_LENGTH,
                actual: bytes.len(),
            })
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Keys and replay window for receiving streams in one rotation period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingKeys {
    /// Key for recognising stream tags.
    pub tag_key: SecretKey,
    /// Key for decrypting stream headers.
    pub header_key: SecretKey,
    /// Rotation period these keys belong to.
    pub rotation_period: u64,
    /// Lowest stream number still accepted.
    pub window_base: u64,
    /// One bit per stream number from `window_base`; set bits have been
    /// consumed.
    pub window_bitmap: Vec<u8>,
}

impl IncomingKeys {
    /// Creates keys with an empty replay window starting at stream zero.
    #[must_use]
    pub fn new(tag_key: SecretKey, header_key: SecretKey, rotation_period: u64) -> Self {
        Self {
            tag_key,
            header_key,
            rotation_period,
            window_base: 0,
            window_bitmap: vec![0; REORDERING_WINDOW_BYTES],
        }
    }
}

/// Keys for sending streams in the current rotation period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingKeys {
    /// Key for producing stream tags.
    pub tag_key: SecretKey,
    /// Key for encrypting stream headers.
    pub header_key: SecretKey,
    /// Rotation period these keys belong to.
    pub rotation_period: u64,
    /// Next stream number to use. Never decreases.
    pub stream_counter: u64,
}

/// The complete key state for one contact over one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportKeys {
    /// Transport the keys are used with.
    pub transport_id: TransportId,
    /// Incoming keys for the previous rotation period.
    pub previous: IncomingKeys,
    /// Incoming keys for the current rotation period.
    pub current: IncomingKeys,
    /// Incoming keys for the next rotation period.
    pub next: IncomingKeys,
    /// Outgoing keys for the current rotation period.
    pub outgoing: OutgoingKeys,
}

impl TransportKeys {
    /// The three incoming key sets, oldest period first.
    #[must_use]
    pub const fn incoming(&self) -> [&IncomingKeys; 3] {
        [&self.previous, &self.current, &self.next]
    }

    /// Rotation period of the current incoming and outgoing keys.
    #[must_use]
    pub const fn rotation_period(&self) -> u64 {
        self.outgoing.rotation_period
    }
}
