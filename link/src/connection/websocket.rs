//! Websocket transport and low-level helpers.
//!
//! - URL resolution and validation for the middleware's DDP endpoint
//! - Strict decoding of inbound DDP frames ([`parse_message`])
//! - Keep-alive jitter
//! - [`WsTransport`] / [`WsConnector`], the `tokio-tungstenite` backed
//!   [`Transport`] and [`Connector`]

use crate::{
    connection::{MAX_WS_BINARY_MESSAGE_BYTES, MAX_WS_TEXT_MESSAGE_BYTES},
    error::{LinkError, Result},
    event_handlers::{ConnectionError, EventHandlers},
    models::{Message, MESSAGE_KINDS},
    timeouts::LinkTimeouts,
    transport::{Connector, Transport},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest, error::Error as WsError, protocol::Message as WsMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

/// Build the websocket URL of the DDP endpoint from a server base URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; `ws(s)` URLs are kept. The
/// path is replaced by `websocket_path` and any fragment is dropped.
pub fn resolve_ws_url(base_url: &str, websocket_path: &str) -> Result<String> {
    let base = Url::parse(base_url.trim()).map_err(|e| {
        LinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
    })?;

    validate_ws_url(&base, "base_url")?;

    let mut ws_url = base.clone();
    let ws_scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s) or ws(s)",
                other
            )));
        },
    };

    ws_url.set_scheme(ws_scheme).map_err(|_| {
        LinkError::ConfigurationError("Failed to set WebSocket URL scheme".to_string())
    })?;
    ws_url.set_fragment(None);
    ws_url.set_query(None);
    ws_url.set_path(websocket_path);

    Ok(ws_url.to_string())
}

/// Reject URLs the client must never dial.
pub fn validate_ws_url(url: &Url, context: &str) -> Result<()> {
    if url.host_str().is_none() {
        return Err(LinkError::ConfigurationError(format!("{} must include a host", context)));
    }

    if !url.username().is_empty() || url.password().is_some() {
        return Err(LinkError::ConfigurationError(format!(
            "{} must not include username/password credentials",
            context
        )));
    }

    Ok(())
}

/// Decode one inbound DDP frame.
///
/// Returns `Ok(None)` for the legacy `{"server_id": ...}` banner some servers
/// send before the handshake. Frames without a known `msg` discriminant are
/// rejected before any field decoding happens.
pub fn parse_message(text: &str) -> Result<Option<Message>> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| LinkError::ProtocolError(format!("Frame is not valid JSON: {}", e)))?;

    let kind = match value.get("msg") {
        Some(JsonValue::String(kind)) => kind.clone(),
        Some(other) => {
            return Err(LinkError::ProtocolError(format!(
                "'msg' must be a string, got {}",
                other
            )));
        },
        None if value.get("server_id").is_some() => return Ok(None),
        None => {
            return Err(LinkError::ProtocolError("Frame has no 'msg' field".to_string()));
        },
    };

    if !MESSAGE_KINDS.contains(&kind.as_str()) {
        return Err(LinkError::ProtocolError(format!("Unknown message type '{}'", kind)));
    }

    // Keep the call id so an undecodable result still fails its caller.
    let call_id = match (kind.as_str(), value.get("id")) {
        ("result", Some(JsonValue::String(id))) => Some(id.clone()),
        ("result", Some(JsonValue::Number(id))) => Some(id.to_string()),
        _ => None,
    };

    serde_json::from_value(value).map(Some).map_err(|e| {
        let reason = format!("Malformed '{}' message: {}", kind, e);
        match call_id {
            Some(id) => LinkError::MalformedResult { id, reason },
            None => LinkError::ProtocolError(reason),
        }
    })
}

/// Spread keepalive pings across connections to avoid synchronized bursts.
///
/// The jitter is derived from `key` so the same session always keeps the
/// same phase.
pub fn jitter_keepalive_interval(base: Duration, key: &str) -> Duration {
    if base.is_zero() {
        return base;
    }

    let base_ms = base.as_millis() as u64;
    if base_ms <= 1 {
        return base;
    }

    // +/-20% jitter window.
    let jitter_span = (base_ms / 5).max(1);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let hashed = hasher.finish();

    let offset = (hashed % (2 * jitter_span + 1)) as i64 - jitter_span as i64;
    let jittered_ms = if offset >= 0 {
        base_ms.saturating_add(offset as u64)
    } else {
        base_ms.saturating_sub((-offset) as u64).max(1)
    };

    Duration::from_millis(jittered_ms)
}

// ── WsTransport ─────────────────────────────────────────────────────────────

/// DDP over a websocket: one JSON text frame per message.
///
/// Websocket pings are answered here and never reach the session. The raw
/// `on_send` / `on_receive` hooks fire from this transport because it is the
/// only layer that sees frame text.
pub struct WsTransport<S> {
    stream: WebSocketStream<S>,
    event_handlers: EventHandlers,
    close_code: Option<u16>,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>, event_handlers: EventHandlers) -> Self {
        Self {
            stream,
            event_handlers,
            close_code: None,
        }
    }

    fn decode_frame(&self, frame: WsMessage) -> Option<Result<String>> {
        match frame {
            WsMessage::Text(text) => {
                if text.len() > MAX_WS_TEXT_MESSAGE_BYTES {
                    return Some(Err(LinkError::ProtocolError(format!(
                        "Text message too large ({} bytes > {} bytes)",
                        text.len(),
                        MAX_WS_TEXT_MESSAGE_BYTES
                    ))));
                }
                Some(Ok(text.as_str().to_string()))
            },
            WsMessage::Binary(data) => {
                if data.len() > MAX_WS_BINARY_MESSAGE_BYTES {
                    return Some(Err(LinkError::ProtocolError(format!(
                        "Binary message too large ({} bytes > {} bytes)",
                        data.len(),
                        MAX_WS_BINARY_MESSAGE_BYTES
                    ))));
                }
                Some(std::str::from_utf8(&data).map(str::to_string).map_err(|e| {
                    LinkError::ProtocolError(format!("Invalid UTF-8 in binary message: {}", e))
                }))
            },
            _ => None,
        }
    }
}

impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: Message) -> Result<()> {
        let payload = serde_json::to_string(&message)?;
        self.event_handlers.emit_send(&payload);
        self.stream
            .send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| {
                LinkError::WebSocketError(format!("Failed to send '{}': {}", message.kind(), e))
            })
    }

    async fn recv(&mut self) -> Option<Result<Message>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(LinkError::WebSocketError(e.to_string()))),
            };

            match frame {
                WsMessage::Ping(payload) => {
                    if let Err(e) = self.stream.send(WsMessage::Pong(payload)).await {
                        return Some(Err(LinkError::WebSocketError(format!(
                            "Failed to answer ping: {}",
                            e
                        ))));
                    }
                    continue;
                },
                WsMessage::Close(frame) => {
                    match frame {
                        Some(f) => {
                            let code = u16::from(f.code);
                            log::debug!(
                                "[truenas-link] Server closed websocket: {} (code: {})",
                                f.reason.as_str(),
                                code
                            );
                            self.close_code = Some(code);
                        },
                        None => log::debug!("[truenas-link] Server closed websocket"),
                    }
                    return None;
                },
                WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
                data => {
                    let Some(decoded) = self.decode_frame(data) else {
                        continue;
                    };
                    let text = match decoded {
                        Ok(text) => text,
                        Err(e) => return Some(Err(e)),
                    };
                    self.event_handlers.emit_receive(&text);
                    match parse_message(&text) {
                        Ok(Some(message)) => return Some(Ok(message)),
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                },
            }
        }
    }

    fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(LinkError::WebSocketError(format!("Failed to close: {}", e))),
        }
    }
}

// ── WsConnector ─────────────────────────────────────────────────────────────

/// Dials the middleware's websocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connection_timeout: Duration,
    event_handlers: EventHandlers,
}

impl WsConnector {
    /// `url` must already be a resolved `ws://` / `wss://` URL
    /// (see [`resolve_ws_url`]).
    pub fn new(url: impl Into<String>, timeouts: &LinkTimeouts, event_handlers: EventHandlers) -> Self {
        Self {
            url: url.into(),
            connection_timeout: timeouts.connection_timeout,
            event_handlers,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport<MaybeTlsStream<TcpStream>>;

    async fn connect(&self) -> Result<Self::Transport> {
        log::debug!("[truenas-link] Establishing WebSocket connection to {}", self.url);

        let request = self.url.as_str().into_client_request().map_err(|e| {
            LinkError::WebSocketError(format!("Failed to build WebSocket request: {}", e))
        })?;

        let connect_result = if !LinkTimeouts::is_no_timeout(self.connection_timeout) {
            tokio::time::timeout(self.connection_timeout, connect_async(request)).await
        } else {
            Ok(connect_async(request).await)
        };

        match connect_result {
            Ok(Ok((stream, _response))) => {
                Ok(WsTransport::new(stream, self.event_handlers.clone()))
            },
            Ok(Err(WsError::Http(response))) => {
                let error = match response.status().as_u16() {
                    401 => LinkError::AuthenticationError(
                        "Unauthorized: WebSocket requires valid credentials".to_string(),
                    ),
                    403 => LinkError::AuthenticationError(
                        "Forbidden: Access to WebSocket denied".to_string(),
                    ),
                    code => LinkError::WebSocketError(format!("WebSocket HTTP error: {}", code)),
                };
                self.event_handlers.emit_error(ConnectionError::new(error.to_string(), false));
                Err(error)
            },
            Ok(Err(e)) => {
                let msg = format!("Connection failed: {}", e);
                self.event_handlers.emit_error(ConnectionError::new(&msg, false));
                Err(LinkError::WebSocketError(msg))
            },
            Err(_) => {
                let msg = format!("Connection timeout ({:?})", self.connection_timeout);
                self.event_handlers.emit_error(ConnectionError::new(&msg, false));
                Err(LinkError::TimeoutError(msg))
            },
        }
    }
}
