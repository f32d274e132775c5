//! # truenas-link: DDP Client for the TrueNAS Middleware
//!
//! An async client for the websocket DDP (Distributed Data Protocol) API
//! exposed by TrueNAS. One connected session carries any number of
//! concurrent method calls and live subscriptions.
//!
//! ## Features
//!
//! - **Session handshake**: `connect` / `connected` / `failed` with protocol
//!   version negotiation and optional session resumption
//! - **Method calls**: results correlated by call id, server errors surfaced
//!   as [`LinkError::MethodCall`]
//! - **Subscriptions**: one reader task fans data messages out to every
//!   subscription routing the message's collection
//! - **Connection loss**: pending calls and subscriptions fail with
//!   [`LinkError::ConnectionLost`] instead of hanging
//! - **EJSON**: helpers for `$date` and `$binary` values
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use truenas_link::{DdpClient, SubscriptionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DdpClient::builder()
//!         .base_url("https://truenas.local")
//!         .api_key("1-abcdef")
//!         .build()?;
//!
//!     client.connect(None).await?;
//!
//!     let version: String = client.call_method("system.version", vec![]).await?;
//!     println!("Running {}", version);
//!
//!     let mut alerts = client.subscribe("alert.list", vec![]).await?;
//!     while let Some(event) = alerts.next().await {
//!         if let SubscriptionEvent::DocumentAdded { id, .. } = event? {
//!             println!("New alert {}", id);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol version
//!
//! ```rust,no_run
//! use truenas_link::{ConnectionOptions, DdpClient, LinkError};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = DdpClient::builder().base_url("https://truenas.local").build()?;
//! match client.connect(None).await {
//!     Err(LinkError::ConnectionRejected { suggested_version }) => {
//!         // The client never retries on its own.
//!         let retry = DdpClient::builder()
//!             .base_url("https://truenas.local")
//!             .connection_options(ConnectionOptions::new().with_protocol_version(suggested_version))
//!             .build()?;
//!         retry.connect(None).await?;
//!     },
//!     other => {
//!         other?;
//!     },
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod connection;
pub mod ejson;
pub mod error;
pub mod event_handlers;
pub mod models;
pub mod session;
pub mod subscription;
pub mod timeouts;
pub mod transport;

// Re-export main types for convenience
pub use auth::AuthProvider;
pub use client::{DdpClient, DdpClientBuilder};
pub use connection::{WsConnector, WsTransport};
pub use error::{LinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectKind, DisconnectReason, EventHandlers};
pub use models::{
    ConnectionOptions, Message, MethodError, SubscriptionConfig, SubscriptionEvent,
    SubscriptionInfo,
};
pub use session::ConnectionState;
pub use subscription::Subscription;
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};
pub use transport::{Connector, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
