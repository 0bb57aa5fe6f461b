use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Listening TCP endpoint.
///
/// Wraps a non-blocking listener. Accepted streams have `TCP_NODELAY` set,
/// since frames are small and latency-sensitive.
pub struct TcpEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpEndpoint {
    /// Bind and listen on all IPv4 interfaces at `port`.
    ///
    /// Port `0` asks the OS for an ephemeral port; see [`TcpEndpoint::local_addr`].
    pub async fn bind_port(port: u16) -> Result<Self> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await
    }

    /// Bind and listen on an explicit address.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%local_addr, "listening on tcp endpoint");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, remote) = self.listener.accept().await.map_err(TransportError::Accept)?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%remote, error = %err, "failed to set TCP_NODELAY");
        }
        debug!(%remote, "accepted connection");
        Ok((stream, remote))
    }

    /// The address this endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

/// Connect to a listening endpoint, giving up after `timeout`.
///
/// `addr` is anything tokio can resolve (`"127.0.0.1:5953"`, `"host:port"`).
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(TransportError::Connect {
                addr: addr.to_string(),
                source,
            })
        }
        Err(_) => {
            return Err(TransportError::ConnectTimeout {
                addr: addr.to_string(),
                timeout,
            })
        }
    };
    if let Err(err) = stream.set_nodelay(true) {
        debug!(addr, error = %err, "failed to set TCP_NODELAY");
    }
    debug!(addr, "connected to tcp endpoint");
    Ok(stream)
}

/// The host part of a remote address, without the port.
pub fn host_of(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}
