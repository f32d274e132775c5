use serde_json::{Map, Value as JsonValue};

use super::message::Message;

/// Data change delivered to a subscription.
///
/// `before_id` / `moved_before` are passed through untouched; the client
/// does not reorder documents.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// A document entered the result set
    DocumentAdded {
        collection: String,
        id: String,
        document: Map<String, JsonValue>,
        /// Id of the document this one was inserted before (`addedBefore` only)
        before_id: Option<String>,
    },

    /// A document left the result set
    DocumentRemoved { collection: String, id: String },

    /// Some fields of a document changed
    DocumentChanged {
        collection: String,
        id: String,
        cleared_fields: Vec<String>,
        updated_fields: Map<String, JsonValue>,
    },

    /// A document changed position in an ordered result set
    DocumentMoved {
        collection: String,
        id: String,
        moved_before: Option<String>,
    },

    /// The server finished sending the initial data set
    Ready,
}

impl SubscriptionEvent {
    /// Convert a data-management message into an event.
    ///
    /// Returns `None` for messages that carry no document data.
    pub fn from_message(message: &Message) -> Option<Self> {
        let event = match message {
            Message::Added {
                collection,
                id,
                fields,
            } => SubscriptionEvent::DocumentAdded {
                collection: collection.clone(),
                id: id.clone(),
                document: fields.clone().unwrap_or_default(),
                before_id: None,
            },
            Message::AddedBefore {
                collection,
                id,
                fields,
                before,
            } => SubscriptionEvent::DocumentAdded {
                collection: collection.clone(),
                id: id.clone(),
                document: fields.clone().unwrap_or_default(),
                before_id: before.clone(),
            },
            Message::Changed {
                collection,
                id,
                fields,
                cleared,
            } => SubscriptionEvent::DocumentChanged {
                collection: collection.clone(),
                id: id.clone(),
                cleared_fields: cleared.clone().unwrap_or_default(),
                updated_fields: fields.clone().unwrap_or_default(),
            },
            Message::Removed { collection, id } => SubscriptionEvent::DocumentRemoved {
                collection: collection.clone(),
                id: id.clone(),
            },
            Message::MovedBefore {
                collection,
                id,
                before,
            } => SubscriptionEvent::DocumentMoved {
                collection: collection.clone(),
                id: id.clone(),
                moved_before: before.clone(),
            },
            _ => return None,
        };
        Some(event)
    }

    /// Collection of the affected document, if this is a document event
    pub fn collection(&self) -> Option<&str> {
        match self {
            Self::DocumentAdded { collection, .. }
            | Self::DocumentRemoved { collection, .. }
            | Self::DocumentChanged { collection, .. }
            | Self::DocumentMoved { collection, .. } => Some(collection.as_str()),
            Self::Ready => None,
        }
    }

    /// Id of the affected document, if this is a document event
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::DocumentAdded { id, .. }
            | Self::DocumentRemoved { id, .. }
            | Self::DocumentChanged { id, .. }
            | Self::DocumentMoved { id, .. } => Some(id.as_str()),
            Self::Ready => None,
        }
    }
}
