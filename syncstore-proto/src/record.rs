//! Sync protocol records exchanged between contacts.
//!
//! Peers gossip about messages with four record types: an [`Offer`]
//! advertises message ids, a [`Request`] asks for some of them, the messages
//! themselves travel as raw bytes, and an [`Ack`] confirms receipt.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, UNIQUE_ID_LENGTH};

/// Maximum payload of a single record in bytes.
pub const MAX_RECORD_PAYLOAD_BYTES: usize = 48 * 1024;

/// Maximum number of message ids that fit in one ack, offer or request.
pub const MAX_MESSAGE_IDS: usize = MAX_RECORD_PAYLOAD_BYTES / UNIQUE_ID_LENGTH;

/// Acknowledges receipt of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Acknowledged messages.
    pub message_ids: Vec<MessageId>,
}

/// Advertises messages the sender holds and the recipient may want.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Offered messages.
    pub message_ids: Vec<MessageId>,
}

/// Asks for previously offered messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Requested messages.
    pub message_ids: Vec<MessageId>,
}

/// Any record that can appear on a sync stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    /// An acknowledgement.
    Ack(Ack),
    /// An offer.
    Offer(Offer),
    /// A request.
    Request(Request),
    /// One raw message.
    Message(Vec<u8>),
}

impl Record {
    /// Message ids carried by the record, empty for raw messages.
    #[must_use]
    pub fn message_ids(&self) -> &[MessageId] {
        match self {
            Self::Ack(a) => &a.message_ids,
            Self::Offer(o) => &o.message_ids,
            Self::Request(r) => &r.message_ids,
            Self::Message(_) => &[],
        }
    }
}

impl From<Ack> for Record {
    fn from(ack: Ack) -> Self {
        Self::Ack(ack)
    }
}

impl From<Offer> for Record {
    fn from(offer: Offer) -> Self {
        Self::Offer(offer)
    }
}

impl From<Request> for Record {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}
