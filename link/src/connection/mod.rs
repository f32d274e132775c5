//! Connection management.
//!
//! This module contains:
//! - [`websocket`]: the websocket [`Transport`](crate::Transport) plus URL
//!   resolution, frame parsing and keepalive jitter
//! - [`pending`]: the registry of in-flight method calls
//! - [`shared`]: the per-session dispatcher task multiplexing calls and
//!   subscriptions over one transport

pub(crate) mod pending;
pub(crate) mod shared;
pub mod websocket;

pub(crate) use shared::SharedConnection;
pub use websocket::{
    jitter_keepalive_interval, parse_message, resolve_ws_url, validate_ws_url, WsConnector,
    WsTransport,
};

/// Capacity of the command channel from client handles to the dispatcher.
pub(crate) const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Maximum text message size (64 MiB).
pub(crate) const MAX_WS_TEXT_MESSAGE_BYTES: usize = 64 << 20;

/// Maximum binary message size (64 MiB).
pub(crate) const MAX_WS_BINARY_MESSAGE_BYTES: usize = 64 << 20;

/// Upper bound on the close handshake when a session ends.
pub(crate) const TRANSPORT_CLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// A duration far enough in the future (~100 years) to act as "never" for
/// deadline calculations without overflowing `Instant::now() + dur`.
pub(crate) const FAR_FUTURE: std::time::Duration =
    std::time::Duration::from_secs(100 * 365 * 24 * 3600);
