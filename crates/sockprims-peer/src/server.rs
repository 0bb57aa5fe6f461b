//! The reactor: one task multiplexing accept and read readiness for every
//! connection of a listening endpoint, plus an idle sweep.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use sockprims_frame::{MessageCodec, Protocol};
use sockprims_transport::TcpEndpoint;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callout::CallOutHandler;
use crate::config::{ConnectionStyle, ServerConfig};
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::{PeerError, Result};
use crate::lifecycle::{ConnectionListener, Listeners};
use crate::registry::ConnectionRegistry;
use crate::sync::lock;

type Readiness = BoxFuture<'static, (Arc<Connection>, bool)>;

/// State shared between the server handle, the reactor task and the sweep.
struct Shared {
    config: ServerConfig,
    protocol: Arc<dyn Protocol>,
    dispatcher: Arc<Dispatcher>,
    registry: ConnectionRegistry,
    listeners: Listeners,
}

impl Shared {
    /// Register a freshly accepted stream, evicting whatever its identity
    /// (or, for `OnlyOne`, any identity) displaces.
    fn admit(&self, stream: TcpStream, remote: SocketAddr) -> Arc<Connection> {
        let style = self.config.connection_style;
        let id = style.identity(&remote);

        if style == ConnectionStyle::OnlyOne {
            for old in self.registry.drain() {
                self.close(&old, "replaced by new connection");
            }
        } else if let Some(old) = self.registry.remove(&id) {
            self.close(&old, "replaced by new connection");
        }

        let parser = self.protocol.create_parser(&id);
        let conn = Connection::new(
            id,
            stream,
            parser,
            Arc::clone(self.dispatcher.codec()),
            self.config.write_timeout(),
        );
        self.registry.insert(Arc::clone(&conn));
        info!(
            alias = %self.config.name,
            peer = %conn.id(),
            %remote,
            clients = self.registry.len(),
            "connection added"
        );
        self.listeners.connected(&conn);
        conn
    }

    /// Remove `conn` if it is still registered, then stop it.
    fn evict(&self, conn: &Arc<Connection>, reason: &str) {
        self.registry.remove_if_same(conn);
        self.close(conn, reason);
    }

    /// Stop an already unregistered connection. Only the first call for a
    /// connection resolves its pending call-outs and notifies listeners.
    fn close(&self, conn: &Arc<Connection>, reason: &str) {
        if !conn.stop() {
            return;
        }
        info!(alias = %self.config.name, peer = %conn.id(), reason, "connection evicted");
        self.dispatcher.connection_closed(conn);
        self.listeners.disconnected(conn);
    }

    fn connection(&self, id: &str) -> Result<Arc<Connection>> {
        self.registry
            .get(id)
            .ok_or_else(|| PeerError::UnknownPeer(id.to_string()))
    }
}

struct Running {
    cancel: CancellationToken,
    local_addr: SocketAddr,
    reactor: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

/// Listening server that accepts peers and multiplexes their traffic.
///
/// ```no_run
/// # async fn demo() -> sockprims_peer::Result<()> {
/// use std::sync::Arc;
/// use sockprims_frame::{HeadTailProtocol, Markers, TaggedCodec};
/// use sockprims_peer::{ServerConfig, SocketServer};
///
/// let markers = Markers::new(vec![0x02], vec![0x03])?;
/// let server = SocketServer::new(
///     ServerConfig::default(),
///     Arc::new(HeadTailProtocol::new("stx-etx", markers.clone())),
///     Arc::new(TaggedCodec::new(markers).with_call_ins(["PING"])),
/// )?;
/// server.register_call_in("PING", |payload, conn| async move {
///     let _ = conn.send(&payload, 1).await;
/// });
/// server.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct SocketServer {
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Option<Running>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SocketServer {
    pub fn new(
        config: ServerConfig,
        protocol: Arc<dyn Protocol>,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<Self> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(config.name.clone(), codec));
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                protocol,
                dispatcher,
                registry: ConnectionRegistry::new(),
                listeners: Listeners::default(),
            }),
            lifecycle: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    /// Bind the listener and spawn the reactor and sweep tasks.
    ///
    /// Does nothing if already started. On bind failure nothing is spawned.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        let endpoint = TcpEndpoint::bind(self.shared.config.bind_addr()).await?;
        let local_addr = endpoint.local_addr();
        let cancel = CancellationToken::new();

        let reactor = tokio::spawn(run_reactor(
            Arc::clone(&self.shared),
            endpoint,
            cancel.clone(),
        ));
        let sweep = tokio::spawn(run_idle_sweep(Arc::clone(&self.shared), cancel.clone()));

        *lock(&self.local_addr) = Some(local_addr);
        *lifecycle = Some(Running {
            cancel,
            local_addr,
            reactor,
            sweep,
        });
        info!(alias = %self.name(), %local_addr, "server started");
        Ok(())
    }

    /// Stop both tasks, evict every connection and release the listener.
    ///
    /// Does nothing if not started.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.lifecycle.lock().await.take() else {
            return Ok(());
        };
        *lock(&self.local_addr) = None;

        running.cancel.cancel();
        if let Err(err) = running.reactor.await {
            warn!(alias = %self.name(), error = %err, "reactor task failed");
        }
        if let Err(err) = running.sweep.await {
            warn!(alias = %self.name(), error = %err, "idle sweep task failed");
        }

        for conn in self.shared.registry.drain() {
            self.shared.close(&conn, "server stopped");
        }
        info!(alias = %self.name(), local_addr = %running.local_addr, "server stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        lock(&self.local_addr).is_some()
    }

    /// Bound address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Route frames whose command is `command` to `handler`.
    pub fn register_call_in<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(Bytes, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shared.dispatcher.register_call_in(command, handler);
    }

    pub fn add_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.shared.listeners.add(listener);
    }

    /// Remove a listener previously added, by identity.
    pub fn remove_listener(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        self.shared.listeners.remove(listener)
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.shared.registry.contains(id)
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.shared.registry.ids()
    }

    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.shared.registry.get(id)
    }

    /// Evict the connection registered under `id`.
    pub fn disconnect(&self, id: &str) -> bool {
        match self.shared.registry.remove(id) {
            Some(conn) => {
                self.shared.close(&conn, "disconnect requested");
                true
            }
            None => false,
        }
    }

    /// Fire-and-forget send with the configured retry count.
    pub async fn send(&self, id: &str, payload: &[u8]) -> Result<()> {
        self.send_with_retries(id, payload, self.shared.config.send_retries)
            .await
    }

    pub async fn send_with_retries(&self, id: &str, payload: &[u8], retries: usize) -> Result<()> {
        let conn = self.target(id)?;
        self.shared.dispatcher.send(&conn, payload, retries).await
    }

    /// Blocking request with the configured timeout.
    pub async fn request(&self, id: &str, payload: &[u8]) -> Result<Bytes> {
        self.request_with_timeout(id, payload, self.shared.config.request_timeout())
            .await
    }

    pub async fn request_with_timeout(
        &self,
        id: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Bytes> {
        let conn = self.target(id)?;
        self.shared
            .dispatcher
            .request(&conn, payload, self.shared.config.send_retries, timeout)
            .await
    }

    /// Callback request with the configured timeout.
    pub async fn request_with_callback(
        &self,
        id: &str,
        payload: &[u8],
        handler: Arc<dyn CallOutHandler>,
    ) -> Result<()> {
        let conn = self.target(id)?;
        let config = &self.shared.config;
        self.shared
            .dispatcher
            .request_with_callback(
                &conn,
                payload,
                config.send_retries,
                config.request_timeout(),
                handler,
            )
            .await
    }

    fn target(&self, id: &str) -> Result<Arc<Connection>> {
        if !self.is_started() {
            return Err(PeerError::NotStarted(self.name().to_string()));
        }
        self.shared.connection(id)
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if let Some(running) = self.lifecycle.get_mut().take() {
            running.cancel.cancel();
            for conn in self.shared.registry.drain() {
                self.shared.close(&conn, "server dropped");
            }
        }
    }
}

impl std::fmt::Debug for SocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketServer")
            .field("name", &self.name())
            .field("local_addr", &self.local_addr())
            .field("clients", &self.client_count())
            .finish()
    }
}

fn readiness(conn: Arc<Connection>) -> Readiness {
    async move {
        let readable = conn.readable().await;
        (conn, readable)
    }
    .boxed()
}

async fn run_reactor(shared: Arc<Shared>, endpoint: TcpEndpoint, cancel: CancellationToken) {
    let mut ready: FuturesUnordered<Readiness> = FuturesUnordered::new();
    debug!(alias = %shared.config.name, "reactor running");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = endpoint.accept() => match accepted {
                Ok((stream, remote)) => {
                    let conn = shared.admit(stream, remote);
                    ready.push(readiness(conn));
                }
                Err(err) => warn!(alias = %shared.config.name, error = %err, "accept failed"),
            },
            Some((conn, readable)) = ready.next(), if !ready.is_empty() => {
                if readable && conn.receive(&*shared.dispatcher) {
                    ready.push(readiness(conn));
                } else {
                    shared.evict(&conn, "stream closed");
                }
            }
        }
    }

    debug!(alias = %shared.config.name, pending = ready.len(), "reactor stopped");
}

async fn run_idle_sweep(shared: Arc<Shared>, cancel: CancellationToken) {
    let threshold = shared.config.idle_timeout();
    let mut interval = tokio::time::interval(threshold);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                for conn in shared.registry.idle(threshold) {
                    debug!(peer = %conn.id(), idle_ms = conn.idle_for().as_millis() as u64, "idle");
                    shared.evict(&conn, "idle timeout");
                }
            }
        }
    }
}
