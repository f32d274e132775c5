//! Main DDP client with builder pattern.
//!
//! Provides the primary interface for connecting to the TrueNAS middleware,
//! calling methods and subscribing to publications.

use crate::{
    auth::AuthProvider,
    connection::{resolve_ws_url, SharedConnection, WsConnector, TRANSPORT_CLOSE_TIMEOUT},
    error::{LinkError, Result},
    event_handlers::{ConnectionError, EventHandlers},
    models::{ConnectionOptions, SubscriptionConfig, SubscriptionInfo},
    session::{handshake, ConnectionState, SessionState},
    subscription::Subscription,
    timeouts::LinkTimeouts,
    transport::{Connector, Transport},
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// DDP client for one middleware endpoint.
///
/// Holds at most one session at a time. The client is `Send + Sync`; wrap it
/// in an `Arc` to issue calls and subscriptions from several tasks over the
/// same session.
///
/// Use [`DdpClientBuilder`] to construct instances with custom configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use truenas_link::{AuthProvider, DdpClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = DdpClient::builder()
///     .base_url("https://truenas.local")
///     .auth(AuthProvider::api_key("1-abcdef"))
///     .build()?;
///
/// let session = client.connect(None).await?;
/// let info: serde_json::Value = client.call_method("system.info", vec![]).await?;
/// println!("Session {}: {}", session, info["version"]);
///
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct DdpClient<C = WsConnector> {
    connector: C,
    timeouts: LinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
    auth: AuthProvider,
    session: SessionState,
}

impl DdpClient<WsConnector> {
    /// Create a new builder for configuring the client
    pub fn builder() -> DdpClientBuilder {
        DdpClientBuilder::new()
    }
}

impl<C: Connector> DdpClient<C> {
    /// Create a client over a custom [`Connector`] with default settings.
    pub fn with_connector(connector: C) -> Self {
        DdpClientBuilder::new().build_with_connector(connector)
    }

    /// Open a transport and perform the `connect` handshake.
    ///
    /// Pass the id of an earlier session to ask the server to resume it.
    /// Returns the server-assigned session id. When the client was built with
    /// credentials, the session is authenticated before this returns; a
    /// failed login disconnects again and returns the login error.
    ///
    /// Fails with [`LinkError::IllegalState`] unless the client is
    /// disconnected, and with [`LinkError::ConnectionRejected`] when the
    /// server does not accept the proposed protocol version.
    pub async fn connect(&self, resume_session_id: Option<&str>) -> Result<String> {
        let connecting = self.session.begin_connect()?;

        let mut transport = self.connector.connect().await?;
        let session_id = match handshake(
            &mut transport,
            &self.connection_options,
            resume_session_id,
            self.timeouts.handshake_timeout,
        )
        .await
        {
            Ok(session_id) => session_id,
            Err(e) => {
                log::warn!("[truenas-link] Handshake failed: {}", e);
                self.event_handlers.emit_error(ConnectionError::new(e.to_string(), false));
                let _ = tokio::time::timeout(TRANSPORT_CLOSE_TIMEOUT, transport.close()).await;
                // Dropping `connecting` reverts to Disconnected.
                return Err(e);
            },
        };

        if resume_session_id.is_some_and(|resumed| resumed != session_id) {
            log::debug!("[truenas-link] Server started a new session instead of resuming");
        }
        log::info!("[truenas-link] Connected (session={})", session_id);

        let connection = Arc::new(SharedConnection::spawn(
            transport,
            session_id.clone(),
            self.timeouts.clone(),
            self.event_handlers.clone(),
        ));
        connecting.complete(connection.clone());
        self.event_handlers.emit_connect(&session_id);

        if self.auth.is_authenticated() {
            if let Err(e) = login(&connection, &self.auth).await {
                drop(connection);
                self.disconnect().await?;
                return Err(e);
            }
        }

        Ok(session_id)
    }

    /// Close the session.
    ///
    /// Pending calls fail with [`LinkError::ConnectionLost`] and open
    /// subscriptions end. A no-op when already disconnected; fails with
    /// [`LinkError::IllegalState`] while `connect()` is still in progress.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(connection) = self.session.take_for_disconnect()? else {
            return Ok(());
        };
        log::debug!("[truenas-link] Disconnecting session {}", connection.session_id());
        connection.shutdown().await;
        Ok(())
    }

    /// Call `method` and deserialize its result.
    ///
    /// An absent `result` deserializes from `null`, so `()` and `Option<T>`
    /// work for methods that return nothing.
    ///
    /// # Example
    /// ```rust,no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = truenas_link::DdpClient::builder().base_url("https://truenas.local").build()?;
    /// # client.connect(None).await?;
    /// #[derive(serde::Deserialize)]
    /// struct Pool {
    ///     id: u64,
    ///     name: String,
    /// }
    ///
    /// let pools: Vec<Pool> = client.call_method("pool.query", vec![]).await?;
    /// for pool in pools {
    ///     println!("{}: {}", pool.id, pool.name);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call_method<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<JsonValue>,
    ) -> Result<T> {
        let value = self.call_method_raw(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            LinkError::SerializationError(format!("Unexpected result for '{}': {}", method, e))
        })
    }

    /// Call `method` and return its raw result (`null` when absent).
    ///
    /// A server-reported error fails with [`LinkError::MethodCall`] and the
    /// `result` field, if any, is discarded.
    pub async fn call_method_raw(&self, method: &str, params: Vec<JsonValue>) -> Result<JsonValue> {
        let connection = self
            .session
            .connection()
            .ok_or_else(|| LinkError::not_connected("call_method"))?;
        connection.call(method, params).await
    }

    /// Subscribe to publication `name`, routing its collection of the same
    /// name to the returned handle.
    pub async fn subscribe(&self, name: &str, params: Vec<JsonValue>) -> Result<Subscription> {
        self.subscribe_with_config(SubscriptionConfig::new(name, params)).await
    }

    /// Subscribe with advanced configuration (custom id, extra collections)
    pub async fn subscribe_with_config(&self, config: SubscriptionConfig) -> Result<Subscription> {
        let connection = self
            .session
            .connection()
            .ok_or_else(|| LinkError::not_connected("subscribe"))?;
        connection.subscribe(config).await
    }

    /// Snapshot of the session's registered subscriptions, oldest first.
    ///
    /// Empty when not connected.
    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        match self.session.connection() {
            Some(connection) => connection.list_subscriptions().await,
            None => Vec::new(),
        }
    }

    /// Log the current session in with `auth`.
    ///
    /// `AuthProvider::None` is accepted and does nothing.
    pub async fn authenticate(&self, auth: &AuthProvider) -> Result<()> {
        let connection = self
            .session
            .connection()
            .ok_or_else(|| LinkError::not_connected("authenticate"))?;
        login(&connection, auth).await
    }

    pub fn state(&self) -> ConnectionState {
        self.session.snapshot()
    }

    /// Id of the live session, if connected
    pub fn session_id(&self) -> Option<String> {
        self.session
            .connection()
            .map(|connection| connection.session_id().to_string())
    }

    pub fn is_connected(&self) -> bool {
        self.session.connection().is_some()
    }

    /// Get the configured timeouts
    pub fn timeouts(&self) -> &LinkTimeouts {
        &self.timeouts
    }

    pub fn connection_options(&self) -> &ConnectionOptions {
        &self.connection_options
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C> std::fmt::Debug for DdpClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdpClient")
            .field("state", &self.session.snapshot())
            .field("auth", &self.auth)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

async fn login(connection: &SharedConnection, auth: &AuthProvider) -> Result<()> {
    let Some((method, params)) = auth.login_call() else {
        return Ok(());
    };

    log::debug!("[truenas-link] Authenticating with {}", method);
    match connection.call(method, params).await {
        Ok(JsonValue::Bool(true)) => {
            log::info!("[truenas-link] Authenticated (session={})", connection.session_id());
            Ok(())
        },
        Ok(other) => Err(LinkError::AuthenticationError(format!(
            "{} rejected the credentials (returned {})",
            method, other
        ))),
        Err(LinkError::MethodCall(error)) => {
            Err(LinkError::AuthenticationError(format!("{} failed: {}", method, error)))
        },
        Err(e) => Err(e),
    }
}

/// Builder for configuring [`DdpClient`] instances.
#[derive(Debug)]
pub struct DdpClientBuilder {
    base_url: Option<String>,
    timeouts: LinkTimeouts,
    connection_options: ConnectionOptions,
    event_handlers: EventHandlers,
    auth: AuthProvider,
}

impl DdpClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            timeouts: LinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            event_handlers: EventHandlers::default(),
            auth: AuthProvider::none(),
        }
    }

    /// Set the server URL, e.g. `https://truenas.local`.
    ///
    /// `http`/`https` map to `ws`/`wss`; the path is replaced by the
    /// configured websocket path.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set API-key authentication
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.auth = AuthProvider::api_key(key);
        self
    }

    /// Set authentication provider directly
    ///
    /// The login call is made during `connect()`.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use truenas_link::{AuthProvider, DdpClient};
    ///
    /// # async fn example() -> truenas_link::Result<()> {
    /// let client = DdpClient::builder()
    ///     .base_url("https://truenas.local")
    ///     .auth(AuthProvider::password("admin", "secret"))
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    /// Set comprehensive timeout configuration for all operations
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use truenas_link::{DdpClient, LinkTimeouts};
    ///
    /// # async fn example() -> truenas_link::Result<()> {
    /// let client = DdpClient::builder()
    ///     .base_url("https://truenas.local")
    ///     .timeouts(LinkTimeouts::fast())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set connection options (protocol version, websocket path)
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    /// Set connection lifecycle event handlers
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Build a client that talks websocket to `base_url`.
    pub fn build(self) -> Result<DdpClient<WsConnector>> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| LinkError::ConfigurationError("base_url is required".into()))?;

        let ws_url = resolve_ws_url(base_url, &self.connection_options.websocket_path)?;
        log::debug!("[truenas-link] Resolved websocket URL {}", ws_url);

        let connector = WsConnector::new(ws_url, &self.timeouts, self.event_handlers.clone());
        Ok(self.build_with_connector(connector))
    }

    /// Build a client over a custom [`Connector`]; `base_url` is ignored.
    pub fn build_with_connector<C: Connector>(self, connector: C) -> DdpClient<C> {
        DdpClient {
            connector,
            timeouts: self.timeouts,
            connection_options: self.connection_options,
            event_handlers: self.event_handlers,
            auth: self.auth,
            session: SessionState::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let client = DdpClient::builder()
            .base_url("https://truenas.local")
            .timeouts(LinkTimeouts::fast())
            .api_key("1-abcdef")
            .build()
            .expect("valid configuration");

        assert_eq!(client.connector().url(), "wss://truenas.local/websocket");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client.session_id().is_none());
    }

    #[test]
    fn test_builder_missing_url() {
        let result = DdpClient::builder().build();
        assert!(matches!(result, Err(LinkError::ConfigurationError(_))));
    }

    #[test]
    fn test_builder_rejects_unsupported_scheme() {
        let result = DdpClient::builder().base_url("ftp://truenas.local").build();
        assert!(matches!(result, Err(LinkError::ConfigurationError(_))));
    }

    #[test]
    fn test_builder_uses_custom_websocket_path() {
        let client = DdpClient::builder()
            .base_url("http://10.0.0.5:8080/ui/")
            .connection_options(ConnectionOptions::new().with_websocket_path("/api/current"))
            .build()
            .unwrap();
        assert_eq!(client.connector().url(), "ws://10.0.0.5:8080/api/current");
    }

    #[test]
    fn test_debug_hides_credentials() {
        let client = DdpClient::builder()
            .base_url("https://truenas.local")
            .auth(AuthProvider::password("admin", "hunter2"))
            .build()
            .unwrap();
        let text = format!("{:?}", client);
        assert!(!text.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_operations_require_a_session() {
        let client = DdpClient::builder().base_url("https://truenas.local").build().unwrap();

        let err = client.call_method_raw("system.info", vec![]).await.unwrap_err();
        assert!(matches!(err, LinkError::IllegalState(_)));

        let err = client.subscribe("pool.query", vec![]).await.unwrap_err();
        assert!(matches!(err, LinkError::IllegalState(_)));

        assert!(client.subscriptions().await.is_empty());
        client.disconnect().await.expect("disconnect while disconnected is a no-op");
    }
}
