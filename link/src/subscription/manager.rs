//! `Subscription` – consumer handle for a single DDP subscription.
//!
//! Receives events routed by the session's dispatcher task
//! ([`SharedConnection`](crate::connection::SharedConnection)).

use crate::{
    connection::shared::{CommandHandle, EventReceiver},
    error::{LinkError, Result},
    models::SubscriptionEvent,
    timeouts::LinkTimeouts,
};
use std::collections::VecDeque;
use std::time::Duration;

/// A live subscription to a server publication.
///
/// The event sequence is infinite until the subscription is closed, the
/// server stops it (`nosub`) or the session is lost, and it cannot be
/// restarted; subscribe again for a fresh one.
///
/// # Examples
///
/// ```rust,no_run
/// use truenas_link::{DdpClient, SubscriptionEvent};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = DdpClient::builder()
///     .base_url("https://truenas.local")
///     .build()?;
/// client.connect(None).await?;
///
/// let mut subscription = client.subscribe("pool.query", vec![]).await?;
///
/// while let Some(event) = subscription.next().await {
///     match event {
///         Ok(SubscriptionEvent::DocumentChanged { id, updated_fields, .. }) => {
///             println!("Pool {} changed: {:?}", id, updated_fields)
///         },
///         Ok(other) => println!("Event: {:?}", other),
///         Err(e) => eprintln!("Error: {}", e),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Subscription {
    id: String,
    name: String,
    /// Receives routed events from the dispatcher task.
    event_rx: EventReceiver,
    /// `None` once an `unsub` has been requested (or is not needed).
    commands: Option<CommandHandle>,
    /// Events read ahead by [`wait_ready`](Self::wait_ready).
    event_queue: VecDeque<SubscriptionEvent>,
    ready: bool,
    unsubscribe_timeout: Duration,
    closed: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        name: String,
        event_rx: EventReceiver,
        commands: CommandHandle,
        unsubscribe_timeout: Duration,
    ) -> Self {
        Self {
            id,
            name,
            event_rx,
            commands: Some(commands),
            event_queue: VecDeque::new(),
            ready: false,
            unsubscribe_timeout,
            closed: false,
        }
    }

    /// Forget the dispatcher without sending `unsub` (the `sub` was never
    /// registered).
    pub(crate) fn disarm(&mut self) {
        self.commands = None;
        self.closed = true;
    }

    /// Subscription id sent in the `sub` message
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publication name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next event.
    ///
    /// Returns `None` once the subscription is closed or the stream has
    /// ended. A server-side `nosub` or a lost session yields one final
    /// `Err` before the stream ends.
    pub async fn next(&mut self) -> Option<Result<SubscriptionEvent>> {
        if let Some(event) = self.event_queue.pop_front() {
            return Some(Ok(event));
        }

        if self.closed {
            return None;
        }

        match self.event_rx.recv().await {
            Some(Ok(event)) => {
                if matches!(event, SubscriptionEvent::Ready) {
                    self.ready = true;
                }
                Some(Ok(event))
            },
            Some(Err(e)) => Some(Err(e)),
            None => {
                // The dispatcher dropped the entry; nothing left to unsubscribe.
                self.closed = true;
                self.commands = None;
                None
            },
        }
    }

    /// Wait until the server reports the initial data set as complete.
    ///
    /// Document events that arrive first are kept and returned by
    /// [`next`](Self::next) in order. The `Ready` event itself is consumed.
    pub async fn wait_ready(&mut self) -> Result<()> {
        if self.ready {
            return Ok(());
        }
        if self.closed {
            return Err(LinkError::IllegalState(format!(
                "Subscription '{}' is closed",
                self.id
            )));
        }

        loop {
            match self.event_rx.recv().await {
                Some(Ok(SubscriptionEvent::Ready)) => {
                    self.ready = true;
                    return Ok(());
                },
                Some(Ok(event)) => self.event_queue.push_back(event),
                Some(Err(e)) => return Err(e),
                None => {
                    self.closed = true;
                    self.commands = None;
                    return Err(LinkError::ConnectionLost(format!(
                        "Subscription '{}' ended before it became ready",
                        self.id
                    )));
                },
            }
        }
    }

    /// Whether the server has reported `ready` for this subscription.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Unsubscribe and wait for the server's `nosub`.
    ///
    /// Safe to call multiple times; subsequent calls are no-ops. Fails with
    /// [`LinkError::TimeoutError`] if the `nosub` does not arrive within the
    /// configured `unsubscribe_timeout`.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed && self.commands.is_none() {
            return Ok(());
        }
        self.closed = true;
        self.event_queue.clear();

        let Some(commands) = self.commands.clone() else {
            return Ok(());
        };
        let ack = commands.unsubscribe(&self.id).await;
        // Sent (or pointless): Drop must not send a second unsub.
        self.commands = None;

        let Some(ack) = ack else {
            return Ok(());
        };

        if LinkTimeouts::is_no_timeout(self.unsubscribe_timeout) {
            let _ = ack.await;
            return Ok(());
        }

        match tokio::time::timeout(self.unsubscribe_timeout, ack).await {
            // A dropped ack means the session ended, which also ends the
            // subscription server-side.
            Ok(_) => Ok(()),
            Err(_) => Err(LinkError::TimeoutError(format!(
                "No nosub for subscription '{}' within {:?}",
                self.id, self.unsubscribe_timeout
            ))),
        }
    }

    /// Returns `true` if `close()` has been called or the stream has ended.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Fire-and-forget unsubscribe; the dispatcher still waits for the
        // nosub before dropping its entry.
        if let Some(commands) = self.commands.take() {
            commands.unsubscribe_on_drop(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ready", &self.ready)
            .field("closed", &self.closed)
            .finish()
    }
}
