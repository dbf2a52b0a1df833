//! Authors, local identities and contacts.

use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::ids::{AuthorId, ContactId, Timestamp};

/// A pseudonymous identity: a display name bound to a public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Hash of the author's public key.
    pub id: AuthorId,
    /// Display name chosen by the author.
    pub name: String,
    /// Signature public key.
    pub public_key: Vec<u8>,
}

/// An identity owned by this device, including its private key.
///
/// The private key is wiped from memory when the value is dropped.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct LocalAuthor {
    /// Public half of the identity.
    #[zeroize(skip)]
    pub author: Author,
    /// Signature private key.
    pub private_key: Vec<u8>,
    /// When the identity was created.
    #[zeroize(skip)]
    pub created: Timestamp,
}

impl LocalAuthor {
    /// Returns the identifier of the wrapped author.
    #[must_use]
    pub const fn id(&self) -> AuthorId {
        self.author.id
    }
}

impl std::fmt::Debug for LocalAuthor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthor")
            .field("author", &self.author)
            .field("private_key", &"<redacted>")
            .field("created", &self.created)
            .finish()
    }
}

/// A remote author that a local identity has a relationship with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Locally assigned identifier.
    pub id: ContactId,
    /// The remote identity.
    pub author: Author,
    /// The local identity this contact belongs to.
    pub local_author_id: AuthorId,
    /// Whether the remote identity was verified in person.
    pub verified: bool,
    /// Whether the contact is in use (inactive contacts are being set up or
    /// torn down and must not sync).
    pub active: bool,
}
