//! Server and client configuration.
//!
//! Durations are carried as milliseconds so configs round-trip through JSON
//! unchanged; use the accessor methods to get [`Duration`]s.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 5953;

/// How accepted connections are identified, and what a new accept evicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStyle {
    /// Identity is the full remote address; many connections per host.
    #[default]
    Normal,
    /// Identity is the remote host; a new connection replaces the host's previous one.
    OneEachClient,
    /// Any new connection evicts every existing one.
    OnlyOne,
}

impl ConnectionStyle {
    /// Registry identity for a connection from `remote`.
    pub fn identity(self, remote: &SocketAddr) -> String {
        match self {
            ConnectionStyle::OneEachClient => sockprims_transport::host_of(remote),
            ConnectionStyle::Normal | ConnectionStyle::OnlyOne => remote.to_string(),
        }
    }
}

/// Reactor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Alias used in log output.
    pub name: String,
    /// Interface to bind.
    pub bind_address: IpAddr,
    /// Port to bind; `0` picks an ephemeral port.
    pub port: u16,
    /// Connections idle longer than this are evicted; also the sweep period.
    pub idle_timeout_ms: u64,
    /// Identity and eviction policy for accepted connections.
    pub connection_style: ConnectionStyle,
    /// Write attempts per send.
    pub send_retries: usize,
    /// Default timeout for blocking and callback requests.
    pub request_timeout_ms: u64,
    /// How long one write attempt may stall before it counts as failed.
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "sockprims".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            idle_timeout_ms: 60_000,
            connection_style: ConnectionStyle::Normal,
            send_retries: 1,
            request_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
        }
    }
}

impl ServerConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parse a config from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the reactor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_ms == 0 {
            return Err(PeerError::Config("idle_timeout_ms must be > 0".to_string()));
        }
        if self.write_timeout_ms == 0 {
            return Err(PeerError::Config("write_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Single-endpoint client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Alias used in log output.
    pub name: String,
    /// Remote `host:port`.
    pub address: String,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Write attempts per send.
    pub send_retries: usize,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "client".to_string(),
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            send_retries: 3,
            request_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    /// Config for `address` with default timeouts.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
