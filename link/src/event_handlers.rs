//! Session event hooks.
//!
//! A [`DdpClient`](crate::DdpClient) reports what happens to its session
//! through optional callbacks: the handshake completing, the session ending,
//! errors on the wire, and every raw frame in either direction.
//!
//! ```rust,no_run
//! use truenas_link::{DdpClient, DisconnectKind, EventHandlers};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handlers = EventHandlers::new()
//!     .on_connect(|session| println!("session {} is up", session))
//!     .on_disconnect(|reason| {
//!         if reason.kind != DisconnectKind::Client {
//!             eprintln!("{}", reason);
//!         }
//!     });
//!
//! let client = DdpClient::builder()
//!     .base_url("https://truenas.local")
//!     .event_handlers(handlers)
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! `on_connect` runs on the task that called `connect()`. Everything else
//! runs on the session's dispatcher task, so a slow callback stalls every
//! pending call and subscription of that session.

use std::fmt;
use std::sync::Arc;

/// Who ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// `disconnect()` was called, or the last client handle was dropped.
    Client,
    /// The server closed the websocket.
    ServerClosed,
    /// The transport failed or the keepalive went unanswered.
    Lost,
}

/// Passed to `on_disconnect` once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub session_id: String,
    pub kind: DisconnectKind,
    pub message: String,
    /// Status code of the server's close frame. Only set for
    /// [`DisconnectKind::ServerClosed`], and only if the frame carried one.
    pub close_code: Option<u16>,
}

impl DisconnectReason {
    pub(crate) fn new(
        session_id: impl Into<String>,
        kind: DisconnectKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            message: message.into(),
            close_code: None,
        }
    }

    pub(crate) fn server_closed(session_id: impl Into<String>, close_code: Option<u16>) -> Self {
        Self {
            close_code,
            ..Self::new(session_id, DisconnectKind::ServerClosed, "Server closed connection")
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {}: {}", self.session_id, self.message)?;
        match self.close_code {
            Some(code) => write!(f, " (close code {})", code),
            None => Ok(()),
        }
    }
}

/// Passed to `on_error`.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub message: String,
    /// `true` when only one frame was lost and the session carries on.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

type FrameHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional callbacks for one client. Cloning shares the callbacks.
#[derive(Clone, Default)]
pub struct EventHandlers {
    on_connect: Option<FrameHook>,
    on_disconnect: Option<Arc<dyn Fn(DisconnectReason) + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(ConnectionError) + Send + Sync>>,
    on_receive: Option<FrameHook>,
    on_send: Option<FrameHook>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the server-assigned session id after `connected`. The id
    /// can be handed back to `connect()` to ask for resumption.
    pub fn on_connect(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Called exactly once when a connected session ends, after every
    /// pending call has been failed.
    pub fn on_disconnect(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Called for skipped frames (`recoverable`) and for the error that
    /// ends a session.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Raw JSON of every inbound frame, before it is parsed.
    ///
    /// ```rust
    /// use truenas_link::EventHandlers;
    ///
    /// let handlers = EventHandlers::new()
    ///     .on_receive(|frame| log::trace!("<- {}", frame))
    ///     .on_send(|frame| log::trace!("-> {}", frame));
    /// ```
    pub fn on_receive(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Raw JSON of every outbound frame.
    pub fn on_send(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_connect(&self, session_id: &str) {
        if let Some(cb) = &self.on_connect {
            cb(session_id);
        }
    }

    pub(crate) fn emit_disconnect(&self, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_receive(&self, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(raw);
        }
    }

    pub(crate) fn emit_send(&self, raw: &str) {
        if let Some(cb) = &self.on_send {
            cb(raw);
        }
    }
}
