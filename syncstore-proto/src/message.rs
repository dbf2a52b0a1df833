//! Groups, messages and the per-contact delivery view of a message.
//!
//! A [`Message`] always belongs to exactly one [`Group`]. Its validation
//! [`MessageState`] is driven by an external validator, and whether it may be
//! exchanged with a given contact depends on that contact's [`Visibility`]
//! of the group.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ClientId, ContactId, GroupId, MessageId, Timestamp};

/// Maximum length in bytes of a raw message, header included.
pub const MAX_MESSAGE_LENGTH: usize = 32 * 1024;

/// Value that deletes a key when passed to a metadata merge.
///
/// Stored values are never empty, so the empty byte string is free to act as
/// the deletion marker.
pub const REMOVE: &[u8] = &[];

/// Key/value metadata attached to a group or message by its client.
pub type Metadata = BTreeMap<String, Vec<u8>>;

/// Namespaced string settings.
pub type Settings = BTreeMap<String, String>;

/// A set of messages that are synced together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Hash of the descriptor.
    pub id: GroupId,
    /// Client that owns the group.
    pub client_id: ClientId,
    /// Opaque client-defined descriptor bytes.
    pub descriptor: Vec<u8>,
}

/// A message as stored and synced: identity, ownership, time and bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Content hash.
    pub id: MessageId,
    /// Group the message belongs to.
    pub group_id: GroupId,
    /// Creation time claimed by the author.
    pub timestamp: Timestamp,
    /// Raw serialized message, as sent over the wire.
    pub raw: Vec<u8>,
}

impl Message {
    /// Length of the raw message in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Whether the raw message is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Validation lifecycle of a message.
///
/// New remote messages start `Unknown`; a validator moves them to `Pending`
/// (waiting on dependencies), `Delivered` or `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Not yet looked at by a validator.
    Unknown,
    /// Rejected by a validator, or depends on a rejected message.
    Invalid,
    /// Valid on its own but waiting for its dependencies.
    Pending,
    /// Valid and handed to its client.
    Delivered,
}

impl MessageState {
    /// Stable numeric encoding used by the store.
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Invalid => 1,
            Self::Pending => 2,
            Self::Delivered => 3,
        }
    }

    /// Decodes the numeric encoding, returning `None` for unknown values.
    #[must_use]
    pub const fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Invalid),
            2 => Some(Self::Pending),
            3 => Some(Self::Delivered),
            _ => None,
        }
    }
}

/// How a group is exposed to one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// The contact has no relationship with the group.
    Invisible,
    /// The contact relationship knows the group, but messages are not
    /// exchanged.
    Visible,
    /// Messages in the group are exchanged with the contact.
    Shared,
}

impl Visibility {
    /// Whether a status row is kept for messages under this visibility.
    #[must_use]
    pub const fn is_visible(self) -> bool {
        !matches!(self, Self::Invisible)
    }
}

/// Delivery state of one message with respect to one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatus {
    /// The message.
    pub message_id: MessageId,
    /// The contact.
    pub contact_id: ContactId,
    /// Whether the message has been offered or sent at least once.
    pub sent: bool,
    /// Whether the contact is known to have the message.
    pub seen: bool,
}
