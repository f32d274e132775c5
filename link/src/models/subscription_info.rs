//! Subscription metadata exposed to callers.
//!
//! [`SubscriptionInfo`] provides a read-only snapshot of an active
//! subscription's state, useful for debugging and tests.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Read-only snapshot of an active subscription's metadata.
///
/// Returned by [`DdpClient::subscriptions()`](crate::DdpClient::subscriptions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Subscription ID sent in the `sub` message.
    pub id: String,
    /// Publication name.
    pub name: String,
    /// Publication parameters.
    pub params: Vec<JsonValue>,
    /// Collections routed to this subscription.
    pub collections: Vec<String>,
    /// Whether the server has reported `ready` for this subscription.
    pub ready: bool,
    /// Whether an `unsub` has been sent and the `nosub` is still outstanding.
    pub closing: bool,
    /// Timestamp (millis since Unix epoch) when the subscription was created.
    pub created_at_ms: u64,
    /// Timestamp (millis since Unix epoch) of the last routed event,
    /// or `None` if no events have been received yet.
    pub last_event_time_ms: Option<u64>,
}
