//! Data models for the truenas-link client library.
//!
//! Defines the DDP wire messages, method error payloads and the
//! subscription-side types handed to callers.

pub mod connection_options;
pub mod message;
pub mod method_error;
pub mod subscription_config;
pub mod subscription_event;
pub mod subscription_info;


pub use connection_options::{ConnectionOptions, DEFAULT_PROTOCOL_VERSION, DEFAULT_WEBSOCKET_PATH};
pub use message::{Message, MESSAGE_KINDS};
pub use method_error::MethodError;
pub use subscription_config::SubscriptionConfig;
pub use subscription_event::SubscriptionEvent;
pub use subscription_info::SubscriptionInfo;
