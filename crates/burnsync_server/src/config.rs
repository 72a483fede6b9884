//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 12525;

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum wait for the reply to one request.
    pub ack_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ack_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the listen port, keeping the bind address.
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Sets the acknowledgment timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 12525);
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builder_pattern() {
        let config = ServerConfig::default()
            .with_port(0)
            .with_ack_timeout(Duration::from_millis(250));
        assert_eq!(config.bind_addr.port(), 0);
        assert!(config.bind_addr.ip().is_loopback());
        assert_eq!(config.ack_timeout, Duration::from_millis(250));
    }
}
