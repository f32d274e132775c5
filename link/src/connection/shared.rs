//! Per-session dispatcher for a connected DDP transport.
//!
//! One background task owns the transport after the handshake. Handles:
//!
//! - A single reader: every inbound frame is decoded once and routed by type
//!   and id (`result` to the pending call, `ready` / `nosub` to the
//!   subscription, data messages to every subscription routing the collection)
//! - Method calls and subscriptions issued from any number of client handles
//! - DDP-level keepalive (`ping` after inbound silence, `pong` deadline)
//! - Failing every pending call and subscription when the session drops
//!
//! There is no automatic reconnect; callers own retry policy.

use crate::{
    connection::{
        jitter_keepalive_interval,
        pending::{CallReply, PendingCalls},
        COMMAND_CHANNEL_CAPACITY, FAR_FUTURE, TRANSPORT_CLOSE_TIMEOUT,
    },
    error::{LinkError, Result},
    event_handlers::{ConnectionError, DisconnectKind, DisconnectReason, EventHandlers},
    models::{Message, MethodError, SubscriptionConfig, SubscriptionEvent, SubscriptionInfo},
    subscription::Subscription,
    timeouts::LinkTimeouts,
    transport::Transport,
};
use serde_json::Value as JsonValue;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use uuid::Uuid;

/// Current time in millis since Unix epoch.
#[inline]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Build a `Vec<SubscriptionInfo>` snapshot from the internal subs map,
/// oldest subscription first.
fn snapshot_subscriptions(subs: &HashMap<String, SubEntry>) -> Vec<SubscriptionInfo> {
    let mut infos: Vec<SubscriptionInfo> = subs
        .iter()
        .map(|(id, entry)| SubscriptionInfo {
            id: id.clone(),
            name: entry.config.name.clone(),
            params: entry.config.params.clone(),
            collections: entry.config.collections.clone(),
            ready: entry.ready,
            closing: entry.closing,
            created_at_ms: entry.created_at_ms,
            last_event_time_ms: entry.last_event_time_ms,
        })
        .collect();
    infos.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms).then_with(|| a.id.cmp(&b.id)));
    infos
}

fn connection_gone() -> LinkError {
    LinkError::ConnectionLost("Connection task is not running".to_string())
}

/// Errors confined to one inbound frame; the session stays usable.
fn is_frame_error(error: &LinkError) -> bool {
    matches!(
        error,
        LinkError::ProtocolError(_)
            | LinkError::SerializationError(_)
            | LinkError::MalformedResult { .. }
    )
}

// ── Commands ────────────────────────────────────────────────────────────────

pub(crate) type EventSender = mpsc::UnboundedSender<Result<SubscriptionEvent>>;
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<Result<SubscriptionEvent>>;

/// Commands sent from the public API to the background connection task.
enum ConnCmd {
    Call {
        id: String,
        method: String,
        params: Vec<JsonValue>,
        reply: CallReply,
    },
    CancelCall {
        id: String,
    },
    Subscribe {
        id: String,
        config: SubscriptionConfig,
        event_tx: EventSender,
        result_tx: oneshot::Sender<Result<()>>,
    },
    Unsubscribe {
        id: String,
        /// Completed when the server's `nosub` arrives
        ack: Option<oneshot::Sender<()>>,
    },
    ListSubscriptions {
        result_tx: oneshot::Sender<Vec<SubscriptionInfo>>,
    },
    Shutdown {
        done: Option<oneshot::Sender<()>>,
    },
}

/// Cloneable sender side of the dispatcher's command queues.
///
/// `Drop` impls cannot await, so they go through the unbounded `drop_tx`
/// queue, which never rejects a command while the task is alive.
#[derive(Clone)]
pub(crate) struct CommandHandle {
    cmd_tx: mpsc::Sender<ConnCmd>,
    drop_tx: mpsc::UnboundedSender<ConnCmd>,
}

impl CommandHandle {
    /// Request `unsub` for `id`. The returned receiver completes when the
    /// matching `nosub` arrives; `None` means the connection is already gone.
    pub async fn unsubscribe(&self, id: &str) -> Option<oneshot::Receiver<()>> {
        let (ack, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(ConnCmd::Unsubscribe {
                id: id.to_string(),
                ack: Some(ack),
            })
            .await
            .ok()?;
        Some(ack_rx)
    }

    /// Fire-and-forget `unsub`, used when a subscription is dropped.
    pub fn unsubscribe_on_drop(&self, id: &str) {
        let _ = self.drop_tx.send(ConnCmd::Unsubscribe {
            id: id.to_string(),
            ack: None,
        });
    }

    fn cancel_call(&self, id: &str) {
        let _ = self.drop_tx.send(ConnCmd::CancelCall { id: id.to_string() });
    }

    /// A handle whose task has already exited.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (cmd_tx, _) = mpsc::channel(1);
        let (drop_tx, _) = mpsc::unbounded_channel();
        Self { cmd_tx, drop_tx }
    }
}

/// Deregisters a call whose future is dropped before the result arrives.
struct CallGuard<'a> {
    id: &'a str,
    commands: &'a CommandHandle,
    armed: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.commands.cancel_call(self.id);
        }
    }
}

// ── Per-subscription state ──────────────────────────────────────────────────

struct SubEntry {
    config: SubscriptionConfig,
    event_tx: EventSender,
    ready: bool,
    /// `unsub` sent, waiting for `nosub`
    closing: bool,
    close_waiters: Vec<oneshot::Sender<()>>,
    created_at_ms: u64,
    last_event_time_ms: Option<u64>,
}

impl SubEntry {
    fn deliver(&mut self, event: Result<SubscriptionEvent>) {
        self.last_event_time_ms = Some(now_ms());
        if self.event_tx.send(event).is_err() {
            log::debug!("[truenas-link] Subscription receiver for '{}' dropped", self.config.name);
        }
    }
}

// ── SharedConnection (public handle) ────────────────────────────────────────

pub(crate) struct SharedConnection {
    commands: CommandHandle,
    connected: Arc<AtomicBool>,
    session_id: String,
    timeouts: LinkTimeouts,
    task: JoinHandle<()>,
}

impl SharedConnection {
    /// Hand a handshaken transport to a new dispatcher task.
    pub fn spawn<T: Transport>(
        transport: T,
        session_id: String,
        timeouts: LinkTimeouts,
        event_handlers: EventHandlers,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<ConnCmd>(COMMAND_CHANNEL_CAPACITY);
        let (drop_tx, drop_rx) = mpsc::unbounded_channel::<ConnCmd>();
        let connected = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(connection_task(
            transport,
            cmd_rx,
            drop_rx,
            session_id.clone(),
            timeouts.clone(),
            event_handlers,
            connected.clone(),
        ));

        Self {
            commands: CommandHandle { cmd_tx, drop_tx },
            connected,
            session_id,
            timeouts,
            task,
        }
    }

    /// Send a `method` message and wait for the correlated `result`.
    pub async fn call(&self, method: &str, params: Vec<JsonValue>) -> Result<JsonValue> {
        let id = Uuid::new_v4().to_string();
        let (reply, reply_rx) = oneshot::channel();

        self.commands
            .cmd_tx
            .send(ConnCmd::Call {
                id: id.clone(),
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|_| connection_gone())?;

        let mut guard = CallGuard {
            id: &id,
            commands: &self.commands,
            armed: true,
        };

        let call_timeout = self.timeouts.call_timeout;
        let outcome = if LinkTimeouts::is_no_timeout(call_timeout) {
            reply_rx.await
        } else {
            match tokio::time::timeout(call_timeout, reply_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(LinkError::TimeoutError(format!(
                        "Method '{}' did not return within {:?}",
                        method, call_timeout
                    )));
                },
            }
        };

        // The dispatcher has already forgotten the call either way.
        guard.armed = false;
        outcome.unwrap_or_else(|_| {
            Err(LinkError::ConnectionLost(format!(
                "Connection closed before '{}' returned",
                method
            )))
        })
    }

    /// Register a subscription and send its `sub` message.
    pub async fn subscribe(&self, config: SubscriptionConfig) -> Result<Subscription> {
        let id = config.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();

        // Built before the round trip so a cancelled subscribe still
        // unsubscribes on drop.
        let mut subscription = Subscription::new(
            id.clone(),
            config.name.clone(),
            event_rx,
            self.commands.clone(),
            self.timeouts.unsubscribe_timeout,
        );

        self.commands
            .cmd_tx
            .send(ConnCmd::Subscribe {
                id,
                config,
                event_tx,
                result_tx,
            })
            .await
            .map_err(|_| connection_gone())?;

        let registered = result_rx.await.map_err(|_| connection_gone()).and_then(|r| r);
        if let Err(e) = registered {
            subscription.disarm();
            return Err(e);
        }
        Ok(subscription)
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        let (result_tx, result_rx) = oneshot::channel();
        if self
            .commands
            .cmd_tx
            .send(ConnCmd::ListSubscriptions { result_tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        result_rx.await.unwrap_or_default()
    }

    /// Close the transport and wait for the dispatcher to finish.
    pub async fn shutdown(&self) {
        let (done, done_rx) = oneshot::channel();
        if self
            .commands
            .cmd_tx
            .send(ConnCmd::Shutdown { done: Some(done) })
            .await
            .is_err()
        {
            return;
        }
        let _ = done_rx.await;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SharedConnection {
    fn drop(&mut self) {
        let _ = self.commands.drop_tx.send(ConnCmd::Shutdown { done: None });
    }
}

// ── Background connection task ──────────────────────────────────────────────

/// What the task loop should do after handling one event.
enum Flow {
    Continue,
    Shutdown(Option<oneshot::Sender<()>>),
    Lost(String),
    /// The server closed the socket, with its close code if it sent one.
    Closed(Option<u16>),
}

/// Why the task loop exited.
enum Ending {
    Client(Option<oneshot::Sender<()>>),
    ServerClosed(Option<u16>),
    Lost(String),
}

#[derive(Default)]
struct Registry {
    pending: PendingCalls,
    subs: HashMap<String, SubEntry>,
}

impl Registry {
    async fn handle_command<T: Transport>(&mut self, transport: &mut T, cmd: ConnCmd) -> Flow {
        match cmd {
            ConnCmd::Call {
                id,
                method,
                params,
                reply,
            } => {
                if !self.pending.insert(id.clone(), method.clone(), reply) {
                    return Flow::Continue;
                }
                log::debug!("[truenas-link] Calling '{}' (id={})", method, id);
                let message = Message::Method {
                    id,
                    method,
                    params,
                    random_seed: None,
                };
                // A failed send leaves the call registered; it fails together
                // with everything else below.
                if let Err(e) = transport.send(message).await {
                    return Flow::Lost(format!("Failed to send method call: {}", e));
                }
            },
            ConnCmd::CancelCall { id } => {
                self.pending.cancel(&id);
            },
            ConnCmd::Subscribe {
                id,
                config,
                event_tx,
                result_tx,
            } => {
                if self.subs.contains_key(&id) {
                    let _ = result_tx.send(Err(LinkError::IllegalState(format!(
                        "Subscription id '{}' is already in use",
                        id
                    ))));
                    return Flow::Continue;
                }
                let message = Message::Sub {
                    id: id.clone(),
                    name: config.name.clone(),
                    params: config.params.clone(),
                };
                if let Err(e) = transport.send(message).await {
                    let reason = format!("Failed to send subscription: {}", e);
                    let _ = result_tx.send(Err(LinkError::ConnectionLost(reason.clone())));
                    return Flow::Lost(reason);
                }
                log::debug!("[truenas-link] Subscribed to '{}' (id={})", config.name, id);
                self.subs.insert(
                    id,
                    SubEntry {
                        config,
                        event_tx,
                        ready: false,
                        closing: false,
                        close_waiters: Vec::new(),
                        created_at_ms: now_ms(),
                        last_event_time_ms: None,
                    },
                );
                let _ = result_tx.send(Ok(()));
            },
            ConnCmd::Unsubscribe { id, ack } => match self.subs.get_mut(&id) {
                Some(entry) => {
                    if let Some(ack) = ack {
                        entry.close_waiters.push(ack);
                    }
                    if !entry.closing {
                        entry.closing = true;
                        log::debug!("[truenas-link] Unsubscribing '{}'", id);
                        if let Err(e) = transport.send(Message::Unsub { id }).await {
                            return Flow::Lost(format!("Failed to send unsubscribe: {}", e));
                        }
                    }
                },
                None => {
                    // Already torn down (server nosub or lost session).
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                },
            },
            ConnCmd::ListSubscriptions { result_tx } => {
                let _ = result_tx.send(snapshot_subscriptions(&self.subs));
            },
            ConnCmd::Shutdown { done } => return Flow::Shutdown(done),
        }
        Flow::Continue
    }

    async fn route_message<T: Transport>(
        &mut self,
        transport: &mut T,
        message: Message,
        event_handlers: &EventHandlers,
    ) -> Flow {
        match message {
            Message::Result { id, error, result } => {
                if !self.pending.resolve(&id, error, result) {
                    log::debug!("[truenas-link] Ignoring result for unknown call '{}'", id);
                }
            },
            Message::Ready { subs } => {
                for id in subs {
                    if let Some(entry) = self.subs.get_mut(&id) {
                        entry.ready = true;
                        entry.deliver(Ok(SubscriptionEvent::Ready));
                    }
                }
            },
            Message::Nosub { id, error } => self.handle_nosub(id, error),
            Message::Ping { id } => {
                if let Err(e) = transport.send(Message::Pong { id }).await {
                    return Flow::Lost(format!("Failed to answer ping: {}", e));
                }
            },
            Message::Pong { .. } => {
                log::debug!("[truenas-link] Keepalive: received pong");
            },
            Message::Updated { methods } => {
                log::debug!("[truenas-link] Writes visible for {} method(s)", methods.len());
            },
            Message::Error {
                reason,
                offending_message,
            } => {
                log::warn!(
                    "[truenas-link] Server rejected a message: {} (offending: {:?})",
                    reason,
                    offending_message
                );
                event_handlers.emit_error(ConnectionError::new(
                    format!("Server rejected a message: {}", reason),
                    true,
                ));
            },
            data @ (Message::Added { .. }
            | Message::AddedBefore { .. }
            | Message::Changed { .. }
            | Message::Removed { .. }
            | Message::MovedBefore { .. }) => self.route_data(&data),
            other => {
                log::warn!(
                    "[truenas-link] Ignoring unexpected '{}' message after handshake",
                    other.kind()
                );
            },
        }
        Flow::Continue
    }

    fn route_data(&mut self, message: &Message) {
        let Some(event) = SubscriptionEvent::from_message(message) else {
            return;
        };
        let Some(collection) = event.collection() else {
            return;
        };

        let mut delivered = 0usize;
        for entry in self
            .subs
            .values_mut()
            .filter(|entry| !entry.closing && entry.config.routes(collection))
        {
            entry.deliver(Ok(event.clone()));
            delivered += 1;
        }

        if delivered == 0 {
            log::debug!("[truenas-link] No subscription routes collection '{}'", collection);
        }
    }

    fn handle_nosub(&mut self, id: String, error: Option<MethodError>) {
        match self.subs.remove(&id) {
            Some(entry) if entry.closing => {
                log::debug!("[truenas-link] Subscription '{}' closed", id);
                for waiter in entry.close_waiters {
                    let _ = waiter.send(());
                }
            },
            Some(entry) => {
                log::warn!(
                    "[truenas-link] Server stopped subscription '{}' ({})",
                    id,
                    entry.config.name
                );
                let _ = entry.event_tx.send(Err(LinkError::SubscriptionStopped { id, error }));
            },
            None => {
                log::debug!("[truenas-link] Ignoring nosub for unknown subscription '{}'", id);
            },
        }
    }

    /// Fail pending calls with `error`. Subscriptions receive the error too
    /// when `notify_subscriptions` is set; their streams end either way.
    fn fail_all(&mut self, error: &LinkError, notify_subscriptions: bool) {
        let failed = self.pending.fail_all(error);
        if failed > 0 {
            log::debug!("[truenas-link] Failed {} pending call(s): {}", failed, error);
        }
        for (_, entry) in self.subs.drain() {
            if notify_subscriptions {
                let _ = entry.event_tx.send(Err(error.clone()));
            }
        }
    }
}

async fn connection_task<T: Transport>(
    mut transport: T,
    mut cmd_rx: mpsc::Receiver<ConnCmd>,
    mut drop_rx: mpsc::UnboundedReceiver<ConnCmd>,
    session_id: String,
    timeouts: LinkTimeouts,
    event_handlers: EventHandlers,
    connected: Arc<AtomicBool>,
) {
    let mut registry = Registry::default();

    let keepalive_dur = if timeouts.keepalive_interval.is_zero() {
        FAR_FUTURE
    } else {
        jitter_keepalive_interval(timeouts.keepalive_interval, &session_id)
    };
    let has_keepalive = !timeouts.keepalive_interval.is_zero();
    let mut idle_deadline = TokioInstant::now() + keepalive_dur;

    let pong_timeout_dur = timeouts.pong_timeout;
    let has_pong_timeout = has_keepalive && !pong_timeout_dur.is_zero();
    let mut awaiting_pong = false;
    let mut pong_deadline = TokioInstant::now() + FAR_FUTURE;
    let mut pings_sent: u64 = 0;

    let ending = loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);

        let pong_sleep = tokio::time::sleep_until(pong_deadline);
        tokio::pin!(pong_sleep);

        let flow = tokio::select! {
            biased;

            _ = &mut pong_sleep, if has_pong_timeout && awaiting_pong => {
                log::warn!(
                    "[truenas-link] Pong timeout ({:?}), server unresponsive",
                    pong_timeout_dur,
                );
                Flow::Lost(format!("Pong timeout ({:?}), server unresponsive", pong_timeout_dur))
            }

            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => registry.handle_command(&mut transport, cmd).await,
                // Every handle is gone.
                None => Flow::Shutdown(None),
            },

            Some(cmd) = drop_rx.recv() => registry.handle_command(&mut transport, cmd).await,

            _ = &mut idle_sleep, if has_keepalive && !awaiting_pong => {
                pings_sent += 1;
                let ping = Message::Ping { id: Some(format!("keepalive-{}", pings_sent)) };
                match transport.send(ping).await {
                    Ok(()) => {
                        if has_pong_timeout {
                            awaiting_pong = true;
                            pong_deadline = TokioInstant::now() + pong_timeout_dur;
                        }
                        idle_deadline = TokioInstant::now() + keepalive_dur;
                        Flow::Continue
                    },
                    Err(e) => Flow::Lost(format!("Keepalive ping failed: {}", e)),
                }
            }

            inbound = transport.recv() => {
                // Any inbound traffic proves the server is alive.
                idle_deadline = TokioInstant::now() + keepalive_dur;
                if awaiting_pong {
                    awaiting_pong = false;
                    pong_deadline = TokioInstant::now() + FAR_FUTURE;
                }

                match inbound {
                    Some(Ok(message)) => {
                        registry.route_message(&mut transport, message, &event_handlers).await
                    },
                    Some(Err(e)) if is_frame_error(&e) => {
                        log::warn!("[truenas-link] Skipping undecodable frame: {}", e);
                        event_handlers.emit_error(ConnectionError::new(e.to_string(), true));
                        if let LinkError::MalformedResult { id, reason } = e {
                            if !registry.pending.fail(&id, LinkError::ProtocolError(reason)) {
                                log::debug!(
                                    "[truenas-link] Malformed result for unknown call '{}'",
                                    id
                                );
                            }
                        }
                        Flow::Continue
                    },
                    Some(Err(e)) => {
                        event_handlers.emit_error(ConnectionError::new(e.to_string(), false));
                        Flow::Lost(e.to_string())
                    },
                    None => Flow::Closed(transport.close_code()),
                }
            }
        };

        match flow {
            Flow::Continue => {},
            Flow::Shutdown(done) => break Ending::Client(done),
            Flow::Lost(message) => break Ending::Lost(message),
            Flow::Closed(close_code) => break Ending::ServerClosed(close_code),
        }
    };

    connected.store(false, Ordering::SeqCst);

    let (reason, done) = match ending {
        Ending::Client(done) => {
            log::info!("[truenas-link] Session {} closed by client", session_id);
            registry.fail_all(
                &LinkError::ConnectionLost("Client disconnected".to_string()),
                false,
            );
            let reason =
                DisconnectReason::new(&session_id, DisconnectKind::Client, "Client disconnected");
            (reason, done)
        },
        Ending::ServerClosed(close_code) => {
            let reason = DisconnectReason::server_closed(&session_id, close_code);
            log::warn!("[truenas-link] {}", reason);
            registry.fail_all(&LinkError::ConnectionLost(reason.message.clone()), true);
            (reason, None)
        },
        Ending::Lost(message) => {
            log::warn!("[truenas-link] Session {} lost: {}", session_id, message);
            registry.fail_all(&LinkError::ConnectionLost(message.clone()), true);
            (DisconnectReason::new(&session_id, DisconnectKind::Lost, message), None)
        },
    };

    if tokio::time::timeout(TRANSPORT_CLOSE_TIMEOUT, transport.close())
        .await
        .is_err()
    {
        log::debug!("[truenas-link] Transport close timed out");
    }

    event_handlers.emit_disconnect(reason);
    if let Some(done) = done {
        let _ = done.send(());
    }
}
