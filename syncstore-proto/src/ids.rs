//! Identifier newtypes and timestamps shared by every `SyncStore` layer.
//!
//! Groups, messages and authors are content-addressed: their identifiers are
//! 32-byte hashes computed by the crypto layer. Contacts get a small local
//! integer that the store assigns and may reuse after removal.

use serde::{Deserialize, Serialize};

/// Length in bytes of every content-addressed identifier.
pub const UNIQUE_ID_LENGTH: usize = 32;

/// Error returned when raw bytes cannot be turned into an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identifier must be {expected} bytes, got {actual}")]
pub struct InvalidIdLength {
    /// Required length.
    pub expected: usize,
    /// Length that was supplied.
    pub actual: usize,
}

macro_rules! hash_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; UNIQUE_ID_LENGTH]);

        impl $name {
            /// Wraps an existing 32-byte hash.
            #[must_use]
            pub const fn new(bytes: [u8; UNIQUE_ID_LENGTH]) -> Self {
                Self(bytes)
            }

            /// Returns the raw hash bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; UNIQUE_ID_LENGTH] {
                &self.0
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = InvalidIdLength;

            fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
                <[u8; UNIQUE_ID_LENGTH]>::try_from(bytes)
                    .map(Self)
                    .map_err(|_| InvalidIdLength {
                        expected: UNIQUE_ID_LENGTH,
                        actual: bytes.len(),
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                for byte in &self.0[..8] {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    };
}

hash_id!(
    /// Content-addressed message identifier.
    MessageId
);

hash_id!(
    /// Content-addressed group identifier (hash of the group descriptor).
    GroupId
);

hash_id!(
    /// Identifier of an author, derived from their public key.
    AuthorId
);

/// Locally assigned contact identifier.
///
/// Not unique over time: the store may hand out the same value again after
/// the contact it previously named has been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(u32);

impl ContactId {
    /// Wraps a raw contact number.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw contact number.
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "contact#{}", self.0)
    }
}

/// Names the application client that owns a group (e.g. `"forum"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a client identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names a transport plugin (e.g. `"tor"`, `"bt"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransportId(String);

impl TransportId {
    /// Creates a transport identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
