//! Authentication provider for the DDP client.
//!
//! The middleware authenticates a session with an ordinary method call made
//! right after the handshake. [`AuthProvider`] picks the login method and its
//! parameters; [`DdpClient::authenticate`](crate::DdpClient::authenticate)
//! performs the call.

use serde_json::{json, Value as JsonValue};
use std::fmt;

/// Method used for API-key logins
pub const LOGIN_WITH_API_KEY: &str = "auth.login_with_api_key";

/// Method used for username/password logins
pub const LOGIN_WITH_PASSWORD: &str = "auth.login";

/// Method used for logins with a previously issued session token
pub const LOGIN_WITH_TOKEN: &str = "auth.token";

/// Authentication credentials for the middleware.
///
/// # Examples
///
/// ```rust
/// use truenas_link::AuthProvider;
///
/// // API key (recommended for unattended clients)
/// let auth = AuthProvider::api_key("1-abcdef");
///
/// // Username and password
/// let auth = AuthProvider::password("admin", "secret");
///
/// // No authentication (login performed manually later)
/// let auth = AuthProvider::none();
/// assert!(!auth.is_authenticated());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub enum AuthProvider {
    /// API key generated in the web UI
    ApiKey(String),

    /// Local user credentials
    Password { username: String, password: String },

    /// Short-lived token from `auth.generate_token`
    Token(String),

    /// No authentication
    None,
}

impl AuthProvider {
    /// Create API-key authentication
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey(key.into())
    }

    /// Create username/password authentication
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Create token authentication
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    /// No authentication
    pub fn none() -> Self {
        Self::None
    }

    /// Check if authentication is configured
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Login method name and parameters, or `None` when no login is needed.
    pub fn login_call(&self) -> Option<(&'static str, Vec<JsonValue>)> {
        match self {
            Self::ApiKey(key) => Some((LOGIN_WITH_API_KEY, vec![json!(key)])),
            Self::Password { username, password } => {
                Some((LOGIN_WITH_PASSWORD, vec![json!(username), json!(password)]))
            },
            Self::Token(token) => Some((LOGIN_WITH_TOKEN, vec![json!(token)])),
            Self::None => None,
        }
    }
}

impl Default for AuthProvider {
    fn default() -> Self {
        Self::None
    }
}

// Secrets stay out of logs.
impl fmt::Debug for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(***)"),
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Token(_) => f.write_str("Token(***)"),
            Self::None => f.write_str("None"),
        }
    }
}
