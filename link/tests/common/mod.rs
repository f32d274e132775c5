//! In-process DDP server harness.
//!
//! [`MockConnector`] hands every transport it opens to a [`MockListener`],
//! so a test can play the server side of each session message by message.

#![allow(dead_code)]

use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use truenas_link::{
    Connector, DdpClient, LinkError, LinkTimeouts, Message, MethodError, Result, Transport,
};

/// Upper bound for any single expected server-side event.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeouts for tests: no keepalive and short round trips.
pub fn test_timeouts() -> LinkTimeouts {
    LinkTimeouts::builder()
        .connection_timeout(STEP_TIMEOUT)
        .handshake_timeout(STEP_TIMEOUT)
        .unsubscribe_timeout(Duration::from_secs(1))
        .keepalive_interval(Duration::ZERO)
        .build()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ── Connector / transport ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct MockConnector {
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub fn new() -> (Self, MockListener) {
        let (servers, accepted) = mpsc::unbounded_channel();
        (Self { servers }, MockListener { accepted })
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<MockTransport> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        self.servers
            .send(MockServer {
                inbound: server_rx,
                outbound: Some(server_tx),
                closed: closed.clone(),
            })
            .map_err(|_| LinkError::WebSocketError("Connection refused".to_string()))?;

        Ok(MockTransport {
            outbound: client_tx,
            inbound: client_rx,
            closed,
        })
    }
}

pub struct MockTransport {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<Result<Message>>,
    closed: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    async fn send(&mut self, message: Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::WebSocketError("Transport is closed".to_string()));
        }
        self.outbound
            .send(message)
            .map_err(|_| LinkError::WebSocketError("Server went away".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Message>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── Server side ─────────────────────────────────────────────────────────────

pub struct MockListener {
    accepted: mpsc::UnboundedReceiver<MockServer>,
}

impl MockListener {
    /// Wait for the client to open a transport.
    pub async fn accept(&mut self) -> MockServer {
        timeout(STEP_TIMEOUT, self.accepted.recv())
            .await
            .expect("client did not open a transport")
            .expect("connector dropped")
    }

    /// Accept a transport and answer its handshake with `connected`.
    pub async fn accept_session(&mut self, session: &str) -> MockServer {
        let mut server = self.accept().await;
        match server.recv().await {
            Message::Connect { .. } => server.send(Message::Connected {
                session: session.to_string(),
            }),
            other => panic!("expected connect, got {:?}", other),
        }
        server
    }
}

pub struct MockServer {
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: Option<mpsc::UnboundedSender<Result<Message>>>,
    closed: Arc<AtomicBool>,
}

impl MockServer {
    /// Next message from the client; panics after [`STEP_TIMEOUT`].
    pub async fn recv(&mut self) -> Message {
        self.recv_within(STEP_TIMEOUT)
            .await
            .expect("client closed the transport")
    }

    /// Next message within `limit`, or `None` if the client closed first.
    pub async fn recv_within(&mut self, limit: Duration) -> Option<Message> {
        timeout(limit, self.inbound.recv())
            .await
            .expect("timed out waiting for a client message")
    }

    /// Assert that nothing arrives for `quiet`.
    pub async fn expect_silence(&mut self, quiet: Duration) {
        if let Ok(Some(message)) = timeout(quiet, self.inbound.recv()).await {
            panic!("expected no message, got {:?}", message);
        }
    }

    pub fn send(&self, message: Message) {
        self.inject(Ok(message));
    }

    /// Deliver a decode error as if a bad frame had arrived.
    pub fn inject(&self, frame: Result<Message>) {
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(frame);
        }
    }

    /// Close the server side; the client sees a clean end of stream.
    pub fn hang_up(&mut self) {
        self.outbound = None;
    }

    /// Whether the client has closed its transport
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reply to a `method` message with `result`.
    pub fn reply(&self, id: &str, result: JsonValue) {
        self.send(Message::Result {
            id: id.to_string(),
            error: None,
            result: Some(result),
        });
    }

    pub fn reply_error(&self, id: &str, error: MethodError) {
        self.send(Message::Result {
            id: id.to_string(),
            error: Some(error),
            result: None,
        });
    }

    /// Receive a `method` message and return `(id, method, params)`.
    pub async fn expect_method(&mut self) -> (String, String, Vec<JsonValue>) {
        match self.recv().await {
            Message::Method {
                id, method, params, ..
            } => (id, method, params),
            other => panic!("expected method, got {:?}", other),
        }
    }

    /// Receive a `sub` message and return `(id, name, params)`.
    pub async fn expect_sub(&mut self) -> (String, String, Vec<JsonValue>) {
        match self.recv().await {
            Message::Sub { id, name, params } => (id, name, params),
            other => panic!("expected sub, got {:?}", other),
        }
    }

    /// Receive an `unsub` message and return its id.
    pub async fn expect_unsub(&mut self) -> String {
        match self.recv().await {
            Message::Unsub { id } => id,
            other => panic!("expected unsub, got {:?}", other),
        }
    }
}

/// A client over a [`MockConnector`] plus the listener for its transports.
pub fn mock_client(timeouts: LinkTimeouts) -> (DdpClient<MockConnector>, MockListener) {
    let (connector, listener) = MockConnector::new();
    let client = DdpClient::builder()
        .timeouts(timeouts)
        .build_with_connector(connector);
    (client, listener)
}

/// Connect `client` and return the server side of the new session.
pub async fn connect(
    client: &DdpClient<MockConnector>,
    listener: &mut MockListener,
    session: &str,
) -> MockServer {
    let (connected, server) = tokio::join!(client.connect(None), listener.accept_session(session));
    assert_eq!(connected.expect("handshake should succeed"), session);
    server
}

/// A connected client with default test timeouts.
pub async fn connected_client() -> (DdpClient<MockConnector>, MockListener, MockServer) {
    init_logging();
    let (client, mut listener) = mock_client(test_timeouts());
    let server = connect(&client, &mut listener, "session-1").await;
    (client, listener, server)
}

pub fn method_error(code: i64, reason: &str) -> MethodError {
    MethodError {
        error: JsonValue::from(code),
        error_type: "CallError".to_string(),
        reason: Some(reason.to_string()),
        message: None,
    }
}
