//! Connection management and request/reply correlation over framed TCP.
//!
//! A [`SocketServer`] runs one reactor task that accepts peers and drives
//! every connection's reads; a [`SocketClient`] does the same for a single
//! outbound connection. Completed frames go to a [`Dispatcher`], which routes
//! peer-initiated commands to registered handlers and matches replies to
//! pending requests by transaction id.

pub mod callin;
pub mod callout;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod failover;
pub mod lifecycle;
pub mod registry;
pub mod server;
mod sync;

pub use callin::{CallInHandler, CallInRegistry};
pub use callout::{
    handler_fn, CallOutHandler, CallOutTable, PendingCallOut, PendingGuard, Registration,
};
pub use client::SocketClient;
pub use config::{ClientConfig, ConnectionStyle, ServerConfig, DEFAULT_PORT};
pub use connection::{Connection, FrameSink};
pub use dispatch::Dispatcher;
pub use error::{PeerError, Result};
pub use failover::{ClientEndpoint, FailoverClient};
pub use lifecycle::ConnectionListener;
pub use registry::ConnectionRegistry;
pub use server::SocketServer;
