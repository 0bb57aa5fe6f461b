//! Framed TCP connections with a single-task reactor.
//!
//! sockprims cuts application frames out of TCP byte streams using
//! configurable head and tail markers, routes peer-initiated commands to
//! handlers, and matches replies to outstanding requests with timeouts.
//!
//! # Crate Structure
//!
//! - [`transport`] — TCP bind, accept and connect
//! - [`frame`] — Head/tail frame delimiting and the message codec contract
//! - [`peer`] — Reactor server, clients and request correlation (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use sockprims_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use sockprims_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use sockprims_peer::*;
}
