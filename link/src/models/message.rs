use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::method_error::MethodError;

/// Every `msg` discriminant the client understands.
///
/// Inbound frames whose `msg` is not in this table are rejected as protocol
/// errors before any field decoding happens.
pub const MESSAGE_KINDS: &[&str] = &[
    "connect",
    "connected",
    "failed",
    "ping",
    "pong",
    "method",
    "result",
    "updated",
    "sub",
    "unsub",
    "nosub",
    "added",
    "addedBefore",
    "changed",
    "removed",
    "movedBefore",
    "ready",
    "error",
];

/// DDP wire message, keyed by the `msg` field.
///
/// Optional fields are omitted on the wire when `None`. `result` and
/// `offendingMessage` keep explicit `null` distinct from absence
/// (`Some(JsonValue::Null)` vs `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "camelCase")]
pub enum Message {
    /// Client handshake request
    Connect {
        /// Previous session to resume, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
        /// Proposed protocol version
        version: String,
        /// All protocol versions the client supports, in order of preference
        support: Vec<String>,
    },

    /// Handshake accepted
    Connected {
        /// Server-assigned session identifier
        session: String,
    },

    /// Handshake rejected
    Failed {
        /// Protocol version the server would accept
        version: String,
    },

    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Remote procedure call
    Method {
        id: String,
        method: String,
        #[serde(default)]
        params: Vec<JsonValue>,
        #[serde(
            rename = "randomSeed",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        random_seed: Option<JsonValue>,
    },

    /// Outcome of a method call, correlated by `id`
    Result {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodError>,
        #[serde(
            default,
            deserialize_with = "present",
            skip_serializing_if = "Option::is_none"
        )]
        result: Option<JsonValue>,
    },

    /// Writes performed by the listed methods are now visible
    Updated { methods: Vec<String> },

    Sub {
        id: String,
        name: String,
        #[serde(default)]
        params: Vec<JsonValue>,
    },

    Unsub { id: String },

    /// Subscription ended, either on request or because of an error
    Nosub {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MethodError>,
    },

    Added {
        collection: String,
        #[serde(deserialize_with = "document_id")]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Map<String, JsonValue>>,
    },

    AddedBefore {
        collection: String,
        #[serde(deserialize_with = "document_id")]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Map<String, JsonValue>>,
        #[serde(default)]
        before: Option<String>,
    },

    Changed {
        collection: String,
        #[serde(deserialize_with = "document_id")]
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Map<String, JsonValue>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cleared: Option<Vec<String>>,
    },

    Removed {
        collection: String,
        #[serde(deserialize_with = "document_id")]
        id: String,
    },

    MovedBefore {
        collection: String,
        #[serde(deserialize_with = "document_id")]
        id: String,
        #[serde(default)]
        before: Option<String>,
    },

    /// Initial data for the listed subscriptions has been sent
    Ready { subs: Vec<String> },

    /// Server could not process a client message
    Error {
        reason: String,
        #[serde(
            rename = "offendingMessage",
            default,
            deserialize_with = "present",
            skip_serializing_if = "Option::is_none"
        )]
        offending_message: Option<JsonValue>,
    },
}

impl Message {
    /// The `msg` discriminant of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "connect",
            Message::Connected { .. } => "connected",
            Message::Failed { .. } => "failed",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Method { .. } => "method",
            Message::Result { .. } => "result",
            Message::Updated { .. } => "updated",
            Message::Sub { .. } => "sub",
            Message::Unsub { .. } => "unsub",
            Message::Nosub { .. } => "nosub",
            Message::Added { .. } => "added",
            Message::AddedBefore { .. } => "addedBefore",
            Message::Changed { .. } => "changed",
            Message::Removed { .. } => "removed",
            Message::MovedBefore { .. } => "movedBefore",
            Message::Ready { .. } => "ready",
            Message::Error { .. } => "error",
        }
    }

    /// Collection name for data-management messages.
    pub fn collection(&self) -> Option<&str> {
        match self {
            Message::Added { collection, .. }
            | Message::AddedBefore { collection, .. }
            | Message::Changed { collection, .. }
            | Message::Removed { collection, .. }
            | Message::MovedBefore { collection, .. } => Some(collection.as_str()),
            _ => None,
        }
    }
}

/// Marks a field as present even when its value is `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<JsonValue>, D::Error>
where
    D: Deserializer<'de>,
{
    JsonValue::deserialize(deserializer).map(Some)
}

/// Document ids are strings in DDP, but the middleware sends numeric
/// primary keys for some collections.
fn document_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(id) => Ok(id),
        JsonValue::Number(id) => Ok(id.to_string()),
        other => Err(D::Error::custom(format!(
            "document id must be a string or number, got {}",
            other
        ))),
    }
}
