//! Error types for truenas-link.
//!
//! Every public operation returns [`Result`]. Handshake and state errors are
//! surfaced to the caller of `connect` / `call_method` / `subscribe`;
//! subscription-stream errors terminate the affected stream.

use crate::models::MethodError;
use thiserror::Error;

/// Result type for truenas-link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors that can occur while talking to the middleware over DDP
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// The server answered the `connect` handshake with `failed`.
    ///
    /// The caller may retry with `suggested_version`; the client never
    /// retries on its own.
    #[error("Connection rejected: server suggests protocol version '{suggested_version}'")]
    ConnectionRejected { suggested_version: String },

    /// An operation was invoked in a state that forbids it
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The server reported an error for a specific method call
    #[error("Method call failed: {0}")]
    MethodCall(MethodError),

    /// Malformed or unrecognized wire message
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A `result` frame for call `id` could not be decoded.
    ///
    /// Raised by the transport only; the waiting caller receives it as a
    /// [`LinkError::ProtocolError`].
    #[error("Malformed result for call '{id}': {reason}")]
    MalformedResult { id: String, reason: String },

    /// The transport dropped while work was still pending
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The server ended a subscription with `nosub` without being asked to
    #[error("Subscription '{id}' stopped by server{}", .error.as_ref().map(|e| format!(": {}", e)).unwrap_or_default())]
    SubscriptionStopped {
        id: String,
        error: Option<MethodError>,
    },

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl LinkError {
    /// Returns `true` when the error means the session is gone and a new
    /// `connect()` is required.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, LinkError::ConnectionLost(_))
    }

    pub(crate) fn not_connected(operation: &str) -> Self {
        LinkError::IllegalState(format!("{} requires a connected session", operation))
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::SerializationError(err.to_string())
    }
}
