//! Timeout configuration for DDP client operations.
//!
//! Provides centralized timeout management for the websocket dial, the
//! `connect` handshake, method calls, unsubscribe round trips and the
//! keep-alive heartbeat.

use std::time::Duration;

/// Timeout configuration for DDP client operations.
///
/// A zero duration disables the corresponding timer.
///
/// # Examples
///
/// ```rust
/// use truenas_link::LinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = LinkTimeouts::default();
///
/// // Bound every method call to 30 seconds
/// let timeouts = LinkTimeouts::builder()
///     .call_timeout(Duration::from_secs(30))
///     .build();
///
/// // Aggressive timeouts for a NAS on the local network
/// let timeouts = LinkTimeouts::fast();
/// ```
#[derive(Debug, Clone)]
pub struct LinkTimeouts {
    /// Timeout for establishing the websocket (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Timeout for the server's answer to the `connect` message.
    /// Default: 10 seconds
    pub handshake_timeout: Duration,

    /// Timeout for a method call's `result`.
    /// Default: 0 (wait until the result arrives or the connection drops)
    pub call_timeout: Duration,

    /// Timeout for the `nosub` acknowledging an `unsub`.
    /// Default: 5 seconds
    pub unsubscribe_timeout: Duration,

    /// Idle interval after which a DDP `ping` is sent.
    /// Set to 0 to disable keep-alive pings.
    /// Default: 60 seconds
    pub keepalive_interval: Duration,

    /// Maximum time to wait for a `pong` (or any other message) after a
    /// keep-alive `ping`. When it expires the connection is treated as lost.
    /// Set to 0 to disable pong timeout checking.
    /// Default: 10 seconds
    pub pong_timeout: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::ZERO,
            unsubscribe_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

impl LinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> LinkTimeoutsBuilder {
        LinkTimeoutsBuilder::new()
    }

    /// Create timeouts suited to a server on the local network.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(10),
            unsubscribe_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
        }
    }

    /// Create timeouts suited to high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            call_timeout: Duration::ZERO,
            unsubscribe_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(30),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365) // > 1 year
    }
}

/// Builder for creating custom [`LinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct LinkTimeoutsBuilder {
    timeouts: LinkTimeouts,
}

impl LinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: LinkTimeouts::default(),
        }
    }

    /// Set the connection timeout (TCP + TLS + websocket upgrade).
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the connection timeout in seconds.
    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    /// Set the handshake timeout (waiting for `connected` / `failed`).
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake_timeout = timeout;
        self
    }

    /// Set the method call timeout.
    /// Set to 0 to wait indefinitely.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.call_timeout = timeout;
        self
    }

    /// Set the method call timeout in seconds.
    pub fn call_timeout_secs(self, secs: u64) -> Self {
        self.call_timeout(Duration::from_secs(secs))
    }

    /// Set the unsubscribe acknowledgement timeout.
    pub fn unsubscribe_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.unsubscribe_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval.
    /// Set to 0 to disable keepalive pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Set the keepalive ping interval in seconds.
    pub fn keepalive_interval_secs(self, secs: u64) -> Self {
        self.keepalive_interval(Duration::from_secs(secs))
    }

    /// Set the pong timeout (max wait for `pong` after sending `ping`).
    /// Set to 0 to disable pong timeout checking.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> LinkTimeouts {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = LinkTimeouts::default();
        assert_eq!(timeouts.connection_timeout, Duration::from_secs(10));
        assert_eq!(timeouts.keepalive_interval, Duration::from_secs(60));
        assert!(timeouts.call_timeout.is_zero(), "calls wait forever by default");
    }

    #[test]
    fn test_builder() {
        let timeouts = LinkTimeouts::builder()
            .connection_timeout_secs(60)
            .call_timeout_secs(30)
            .keepalive_interval(Duration::ZERO)
            .build();

        assert_eq!(timeouts.connection_timeout, Duration::from_secs(60));
        assert_eq!(timeouts.call_timeout, Duration::from_secs(30));
        assert!(timeouts.keepalive_interval.is_zero());
    }

    #[test]
    fn test_fast_preset() {
        let timeouts = LinkTimeouts::fast();
        assert!(timeouts.connection_timeout <= Duration::from_secs(5));
        assert!(timeouts.handshake_timeout <= Duration::from_secs(5));
    }

    #[test]
    fn test_relaxed_preset() {
        let timeouts = LinkTimeouts::relaxed();
        assert!(timeouts.connection_timeout >= Duration::from_secs(30));
        assert!(timeouts.unsubscribe_timeout >= Duration::from_secs(10));
    }

    #[test]
    fn test_is_no_timeout() {
        assert!(LinkTimeouts::is_no_timeout(Duration::ZERO));
        assert!(!LinkTimeouts::is_no_timeout(Duration::from_secs(1)));
        assert!(!LinkTimeouts::is_no_timeout(Duration::from_secs(3600)));
    }
}
