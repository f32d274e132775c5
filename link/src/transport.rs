//! Transport boundary between the DDP session and the byte stream.
//!
//! The session layer only ever sends and receives whole [`Message`]s;
//! framing, encryption and websocket control frames belong to the transport.
//! [`WsTransport`](crate::connection::WsTransport) is the production
//! implementation. Tests plug in channel-backed transports through a custom
//! [`Connector`].

use std::future::Future;

use crate::{error::Result, models::Message};

/// A duplex, message-oriented connection to the server.
///
/// Exactly one task owns a transport at a time: the handshake while
/// connecting, then the connection's dispatcher task.
pub trait Transport: Send + 'static {
    /// Send one message.
    fn send(&mut self, message: Message) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next message.
    ///
    /// `None` means the peer closed the connection cleanly. An `Err` of
    /// kind [`ProtocolError`](crate::LinkError::ProtocolError),
    /// [`SerializationError`](crate::LinkError::SerializationError) or
    /// [`MalformedResult`](crate::LinkError::MalformedResult) affects a
    /// single frame; any other error means the connection is unusable.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Message>>> + Send;

    /// Status code the peer sent when it closed the connection, once
    /// [`recv`](Transport::recv) has returned `None`.
    fn close_code(&self) -> Option<u16> {
        None
    }

    /// Close the connection. Calling `close` twice is not an error.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens a fresh [`Transport`] for every `connect()` call.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self) -> impl Future<Output = Result<Self::Transport>> + Send;
}
