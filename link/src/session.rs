//! Session state machine and the `connect` handshake.
//!
//! `Disconnected → Connecting → Connected(session)`. Transitions happen under
//! one short-lived lock owned by the client instance, so two concurrent
//! `connect()` calls can never both handshake. The lock is never held across
//! an await.

use crate::{
    connection::SharedConnection,
    error::{LinkError, Result},
    models::{ConnectionOptions, Message},
    timeouts::LinkTimeouts,
    transport::Transport,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Observable state of a client's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// A handshake is in flight
    Connecting,
    Connected { session_id: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

enum Slot {
    Disconnected,
    Connecting,
    Connected(Arc<SharedConnection>),
}

/// Owner of the client's single session slot.
pub(crate) struct SessionState {
    slot: Mutex<Slot>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Disconnected),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // A session whose dispatcher has exited is over.
        if let Slot::Connected(connection) = &*slot {
            if !connection.is_connected() {
                log::debug!(
                    "[truenas-link] Session {} is gone; state is now Disconnected",
                    connection.session_id()
                );
                *slot = Slot::Disconnected;
            }
        }
        slot
    }

    /// `Disconnected → Connecting`. The returned guard reverts to
    /// `Disconnected` unless [`ConnectingGuard::complete`] is called, which
    /// also covers a cancelled `connect()` future.
    pub fn begin_connect(&self) -> Result<ConnectingGuard<'_>> {
        let mut slot = self.lock();
        match *slot {
            Slot::Disconnected => {
                *slot = Slot::Connecting;
                Ok(ConnectingGuard {
                    state: self,
                    armed: true,
                })
            },
            Slot::Connecting => Err(LinkError::IllegalState(
                "connect() is already in progress".to_string(),
            )),
            Slot::Connected(_) => Err(LinkError::IllegalState(
                "Already connected; call disconnect() first".to_string(),
            )),
        }
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<Arc<SharedConnection>> {
        match &*self.lock() {
            Slot::Connected(connection) => Some(connection.clone()),
            _ => None,
        }
    }

    /// `Connected → Disconnected`, handing back the connection to shut down.
    ///
    /// A no-op when already disconnected. Fails while a handshake is in
    /// flight.
    pub fn take_for_disconnect(&self) -> Result<Option<Arc<SharedConnection>>> {
        let mut slot = self.lock();
        match std::mem::replace(&mut *slot, Slot::Disconnected) {
            Slot::Disconnected => Ok(None),
            Slot::Connecting => {
                *slot = Slot::Connecting;
                Err(LinkError::IllegalState(
                    "disconnect() called while a handshake is in flight".to_string(),
                ))
            },
            Slot::Connected(connection) => Ok(Some(connection)),
        }
    }

    pub fn snapshot(&self) -> ConnectionState {
        match &*self.lock() {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting => ConnectionState::Connecting,
            Slot::Connected(connection) => ConnectionState::Connected {
                session_id: connection.session_id().to_string(),
            },
        }
    }
}

pub(crate) struct ConnectingGuard<'a> {
    state: &'a SessionState,
    armed: bool,
}

impl ConnectingGuard<'_> {
    pub fn complete(mut self, connection: Arc<SharedConnection>) {
        *self.state.lock() = Slot::Connected(connection);
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.lock() = Slot::Disconnected;
        }
    }
}

/// Send `connect` and wait for exactly one reply.
///
/// Returns the server-assigned session id on `connected`. `failed` becomes
/// [`LinkError::ConnectionRejected`] carrying the server's suggested version.
pub(crate) async fn handshake<T: Transport>(
    transport: &mut T,
    options: &ConnectionOptions,
    resume_session_id: Option<&str>,
    timeout: Duration,
) -> Result<String> {
    transport
        .send(Message::Connect {
            session: resume_session_id.map(str::to_string),
            version: options.protocol_version.clone(),
            support: options.supported_versions.clone(),
        })
        .await?;

    let reply = if LinkTimeouts::is_no_timeout(timeout) {
        transport.recv().await
    } else {
        tokio::time::timeout(timeout, transport.recv()).await.map_err(|_| {
            LinkError::TimeoutError(format!("No handshake response within {:?}", timeout))
        })?
    };

    match reply {
        Some(Ok(Message::Connected { session })) => Ok(session),
        Some(Ok(Message::Failed { version })) => Err(LinkError::ConnectionRejected {
            suggested_version: version,
        }),
        Some(Ok(other)) => Err(LinkError::ProtocolError(format!(
            "Expected 'connected' or 'failed' during handshake, got '{}'",
            other.kind()
        ))),
        Some(Err(e)) => Err(e),
        None => Err(LinkError::ConnectionLost(
            "Server closed the connection during the handshake".to_string(),
        )),
    }
}
