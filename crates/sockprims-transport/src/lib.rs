//! TCP transport abstraction.
//!
//! Provides the listening endpoint used by the reactor and the outbound
//! connect used by clients. Streams are handed out as non-blocking
//! [`tokio::net::TcpStream`]s; readiness and framing are layered on top by
//! `sockprims-peer` and `sockprims-frame`.
//!
//! This is the lowest layer of sockprims.

pub mod error;
pub mod tcp;

pub use error::{Result, TransportError};
pub use tcp::{connect, host_of, TcpEndpoint};
