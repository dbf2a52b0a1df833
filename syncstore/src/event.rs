//! Domain events and the bus that delivers them.
//!
//! Mutations record [`Event`]s on their transaction. The bus only sees them
//! after the transaction commits, so listeners never observe a change that
//! could still be rolled back.

use std::sync::Arc;

use parking_lot::RwLock;
use syncstore_proto::ids::{AuthorId, ContactId, GroupId, MessageId, TransportId};
use syncstore_proto::message::{MessageState, Settings};

/// Something that changed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A local identity was added.
    LocalAuthorAdded(AuthorId),
    /// A local identity and its contacts were removed.
    LocalAuthorRemoved(AuthorId),
    /// A contact was added.
    ContactAdded {
        /// The new contact.
        contact_id: ContactId,
        /// Whether it starts active.
        active: bool,
    },
    /// A contact was removed.
    ContactRemoved(ContactId),
    /// A contact's verified flag changed.
    ContactVerified(ContactId),
    /// A contact was activated or deactivated.
    ContactStatusChanged {
        /// The contact.
        contact_id: ContactId,
        /// The new flag.
        active: bool,
    },
    /// A group was added.
    GroupAdded(GroupId),
    /// A group and its messages were removed.
    GroupRemoved(GroupId),
    /// The visibility of a group changed for these contacts.
    GroupVisibilityUpdated(Vec<ContactId>),
    /// A message was stored.
    MessageAdded {
        /// The message.
        message_id: MessageId,
        /// Its group.
        group_id: GroupId,
        /// Contact it arrived from, `None` for locally created messages.
        contact_id: Option<ContactId>,
    },
    /// A message's validation state changed.
    MessageStateChanged {
        /// The message.
        message_id: MessageId,
        /// Whether the message was created locally.
        local: bool,
        /// The new state.
        state: MessageState,
    },
    /// A message was approved for sharing.
    MessageShared(MessageId),
    /// There are messages to acknowledge to this contact.
    MessageToAck(ContactId),
    /// There are offered messages to request from this contact.
    MessageToRequest(ContactId),
    /// This contact requested messages.
    MessageRequested(ContactId),
    /// This contact acknowledged messages.
    MessagesAcked {
        /// The contact.
        contact_id: ContactId,
        /// Messages that were acknowledged.
        message_ids: Vec<MessageId>,
    },
    /// Messages were handed to a transport for this contact.
    MessagesSent {
        /// The contact.
        contact_id: ContactId,
        /// Messages that were sent.
        message_ids: Vec<MessageId>,
    },
    /// Settings in a namespace changed.
    SettingsUpdated {
        /// The namespace.
        namespace: String,
        /// The merged values.
        settings: Settings,
    },
    /// A transport was registered.
    TransportAdded {
        /// The transport.
        transport_id: TransportId,
        /// Its maximum latency in milliseconds.
        max_latency: u32,
    },
    /// A transport and its keys were removed.
    TransportRemoved(TransportId),
}

/// Receives committed events.
pub trait EventListener: Send + Sync {
    /// Called once per event, on the thread that committed the transaction.
    fn event_occurred(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn event_occurred(&self, event: &Event) {
        self(event);
    }
}

/// Fan-out of committed events to registered listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    /// Creates a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().push(listener);
    }

    /// Unregisters a listener previously passed to [`add_listener`](Self::add_listener).
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Delivers an event to every listener, in registration order.
    pub fn broadcast(&self, event: &Event) {
        // Snapshot so listeners may add or remove listeners.
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.event_occurred(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
