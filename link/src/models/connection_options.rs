use serde::{Deserialize, Serialize};

/// DDP protocol version proposed by default.
pub const DEFAULT_PROTOCOL_VERSION: &str = "1";

/// Path of the DDP websocket endpoint on the middleware.
pub const DEFAULT_WEBSOCKET_PATH: &str = "/websocket";

/// Connection-level options for the DDP session.
///
/// Separate from [`LinkTimeouts`](crate::LinkTimeouts), which control timing.
///
/// # Example
///
/// ```rust
/// use truenas_link::ConnectionOptions;
///
/// // Retry a handshake with the version the server asked for.
/// let options = ConnectionOptions::new().with_protocol_version("pre2");
/// assert_eq!(options.supported_versions, vec!["pre2".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Version proposed in the `connect` message.
    /// Default: "1"
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    /// Versions listed in `support`, most preferred first.
    /// Default: ["1"]
    #[serde(default = "default_supported_versions")]
    pub supported_versions: Vec<String>,

    /// Path of the websocket endpoint, replacing the base URL's path.
    /// Default: "/websocket"
    #[serde(default = "default_websocket_path")]
    pub websocket_path: String,
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.to_string()
}

fn default_supported_versions() -> Vec<String> {
    vec![DEFAULT_PROTOCOL_VERSION.to_string()]
}

fn default_websocket_path() -> String {
    DEFAULT_WEBSOCKET_PATH.to_string()
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            supported_versions: default_supported_versions(),
            websocket_path: default_websocket_path(),
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Propose `version` and advertise it as the only supported version.
    ///
    /// Use this after a `ConnectionRejected` error to retry with the
    /// server's suggestion.
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.supported_versions = vec![version.clone()];
        self.protocol_version = version;
        self
    }

    /// Set the advertised version list without changing the proposal
    pub fn with_supported_versions(mut self, versions: Vec<String>) -> Self {
        self.supported_versions = versions;
        self
    }

    /// Set the websocket endpoint path
    pub fn with_websocket_path(mut self, path: impl Into<String>) -> Self {
        self.websocket_path = path.into();
        self
    }
}
