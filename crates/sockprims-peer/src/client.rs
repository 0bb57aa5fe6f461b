//! Single-endpoint client.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sockprims_frame::{MessageCodec, Protocol};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::callout::CallOutHandler;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::{PeerError, Result};
use crate::failover::ClientEndpoint;
use crate::sync::lock;

struct Active {
    conn: Arc<Connection>,
    reader: JoinHandle<()>,
}

/// Client of one remote endpoint.
///
/// Owns at most one connection and a read task that drives it through the
/// same receive and dispatch cycle as the server's reactor.
pub struct SocketClient {
    config: ClientConfig,
    protocol: Arc<dyn Protocol>,
    dispatcher: Arc<Dispatcher>,
    connecting: tokio::sync::Mutex<()>,
    active: Mutex<Option<Active>>,
}

impl SocketClient {
    pub fn new(
        config: ClientConfig,
        protocol: Arc<dyn Protocol>,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(config.name.clone(), codec));
        Self {
            config,
            protocol,
            dispatcher,
            connecting: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Connect if not already connected.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.connecting.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.release().await;

        let stream =
            sockprims_transport::connect(&self.config.address, self.config.connect_timeout())
                .await?;
        let conn = Connection::new(
            self.config.address.clone(),
            stream,
            self.protocol.create_parser(&self.config.address),
            Arc::clone(self.dispatcher.codec()),
            self.config.write_timeout(),
        );
        let reader = tokio::spawn(run_reader(
            Arc::clone(&conn),
            Arc::clone(&self.dispatcher),
        ));
        *lock(&self.active) = Some(Active { conn, reader });

        info!(alias = %self.config.name, address = %self.config.address, "connected");
        Ok(())
    }

    /// Connect unless connected; reports whether a connection is up afterwards.
    pub async fn try_connect(&self) -> bool {
        match self.connect().await {
            Ok(()) => true,
            Err(err) => {
                warn!(alias = %self.config.name, address = %self.config.address, error = %err, "connect failed");
                false
            }
        }
    }

    /// Close the connection, if any. Pending requests resolve as disconnected.
    pub async fn disconnect(&self) {
        let _connecting = self.connecting.lock().await;
        self.release().await;
    }

    async fn release(&self) {
        let previous = lock(&self.active).take();
        if let Some(Active { conn, reader }) = previous {
            conn.stop();
            if let Err(err) = reader.await {
                warn!(alias = %self.config.name, error = %err, "read task failed");
            }
            debug!(alias = %self.config.name, "connection released");
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|active| !active.conn.is_stopped())
    }

    /// Route frames whose command is `command` to `handler`.
    pub fn register_call_in<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(Bytes, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispatcher.register_call_in(command, handler);
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let conn = self.connection()?;
        self.dispatcher
            .send(&conn, payload, self.config.send_retries)
            .await
    }

    /// Blocking request with the configured timeout.
    pub async fn request(&self, payload: &[u8]) -> Result<Bytes> {
        self.request_with_timeout(payload, self.config.request_timeout())
            .await
    }

    pub async fn request_with_timeout(&self, payload: &[u8], timeout: Duration) -> Result<Bytes> {
        let conn = self.connection()?;
        self.dispatcher
            .request(&conn, payload, self.config.send_retries, timeout)
            .await
    }

    pub async fn request_with_callback(
        &self,
        payload: &[u8],
        handler: Arc<dyn CallOutHandler>,
    ) -> Result<()> {
        let conn = self.connection()?;
        self.dispatcher
            .request_with_callback(
                &conn,
                payload,
                self.config.send_retries,
                self.config.request_timeout(),
                handler,
            )
            .await
    }

    fn connection(&self) -> Result<Arc<Connection>> {
        lock(&self.active)
            .as_ref()
            .filter(|active| !active.conn.is_stopped())
            .map(|active| Arc::clone(&active.conn))
            .ok_or_else(|| PeerError::NotConnected(self.config.name.clone()))
    }
}

impl ClientEndpoint for SocketClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_connected(&self) -> bool {
        SocketClient::is_connected(self)
    }

    async fn try_connect(&self) -> bool {
        SocketClient::try_connect(self).await
    }

    async fn disconnect(&self) {
        SocketClient::disconnect(self).await
    }

    async fn send(&self, payload: &[u8]) -> Result<()> {
        SocketClient::send(self, payload).await
    }

    async fn request(&self, payload: &[u8]) -> Result<Bytes> {
        SocketClient::request(self, payload).await
    }

    async fn request_with_callback(
        &self,
        payload: &[u8],
        handler: Arc<dyn CallOutHandler>,
    ) -> Result<()> {
        SocketClient::request_with_callback(self, payload, handler).await
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        if let Some(active) = lock(&self.active).take() {
            active.conn.stop();
        }
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("name", &self.config.name)
            .field("address", &self.config.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn run_reader(conn: Arc<Connection>, dispatcher: Arc<Dispatcher>) {
    while conn.readable().await && conn.receive(&*dispatcher) {}
    if conn.stop() {
        info!(alias = %dispatcher.name(), peer = %conn.id(), "connection lost");
    }
    dispatcher.connection_closed(&conn);
}
