//! Routing of completed frames, and the three request modes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sockprims_frame::{hex_preview, ErrorCode, MessageCodec, DEFAULT_PREVIEW_LEN};
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, trace};

use crate::callin::CallInRegistry;
use crate::callout::{CallOutHandler, CallOutTable, PendingGuard};
use crate::connection::{Connection, FrameSink};
use crate::error::{PeerError, Result};

/// Classifies frames as call-ins or replies and correlates replies with
/// pending requests.
///
/// Shared by a server's reactor or a client's read task (as the
/// [`FrameSink`]) and by application tasks issuing requests.
pub struct Dispatcher {
    name: String,
    codec: Arc<dyn MessageCodec>,
    call_ins: CallInRegistry,
    call_outs: Arc<CallOutTable>,
}

impl Dispatcher {
    pub fn new(name: impl Into<String>, codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            name: name.into(),
            codec,
            call_ins: CallInRegistry::new(),
            call_outs: Arc::new(CallOutTable::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    pub fn call_ins(&self) -> &CallInRegistry {
        &self.call_ins
    }

    pub fn call_outs(&self) -> &CallOutTable {
        &self.call_outs
    }

    /// Route frames whose command is `command` to `handler`.
    pub fn register_call_in<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(Bytes, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.call_ins.register(command, handler);
    }

    /// Fire-and-forget.
    pub async fn send(&self, conn: &Connection, payload: &[u8], retries: usize) -> Result<()> {
        conn.send(payload, retries).await
    }

    /// Send `payload` and wait up to `timeout` for the reply carrying the
    /// same transaction id.
    pub async fn request(
        &self,
        conn: &Connection,
        payload: &[u8],
        retries: usize,
        timeout: Duration,
    ) -> Result<Bytes> {
        let tx = self.transaction_of(payload)?;
        let (registration, mut receiver) =
            self.call_outs.register_waiter(conn.id(), &tx, timeout)?;
        let guard = PendingGuard::new(&self.call_outs, registration);

        conn.send(payload, retries).await?;

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(PeerError::Disconnected(conn.id().to_string())),
            Err(_) => {
                if self
                    .call_outs
                    .take_registration(guard.registration())
                    .is_some()
                {
                    debug!(peer = %conn.id(), tx = %tx, "request timed out");
                    return Err(PeerError::Timeout(timeout));
                }
                // The reply path removed the entry first; its value is in flight.
                match receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(TryRecvError::Empty) => receiver
                        .await
                        .unwrap_or_else(|_| Err(PeerError::Disconnected(conn.id().to_string()))),
                    Err(TryRecvError::Closed) => {
                        Err(PeerError::Disconnected(conn.id().to_string()))
                    }
                }
            }
        }
    }

    /// Send `payload`; `handler` later receives either the reply or a
    /// timeout, never both.
    ///
    /// A send failure unregisters the request and is returned; the handler
    /// is not called.
    pub async fn request_with_callback(
        &self,
        conn: &Connection,
        payload: &[u8],
        retries: usize,
        timeout: Duration,
        handler: Arc<dyn CallOutHandler>,
    ) -> Result<()> {
        let tx = self.transaction_of(payload)?;
        let registration = self
            .call_outs
            .register_callback(conn.id(), &tx, timeout, handler)?;

        if let Err(err) = conn.send(payload, retries).await {
            drop(self.call_outs.take_registration(&registration));
            return Err(err);
        }

        let table = Arc::clone(&self.call_outs);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(pending) = table.take_registration(&registration) {
                pending.expire();
            }
        });
        Ok(())
    }

    /// Resolve every pending call-out of `conn` as disconnected.
    pub fn connection_closed(&self, conn: &Connection) {
        let abandoned = self.call_outs.remove_peer(conn.id());
        if abandoned > 0 {
            debug!(alias = %self.name, peer = %conn.id(), abandoned, "pending call-outs abandoned");
        }
    }

    fn transaction_of(&self, payload: &[u8]) -> Result<String> {
        self.codec.find_transaction(payload).ok_or_else(|| {
            PeerError::InvalidRequest(format!(
                "no transaction id in {}",
                hex_preview(payload, DEFAULT_PREVIEW_LEN)
            ))
        })
    }
}

impl FrameSink for Dispatcher {
    fn frame_received(&self, conn: &Arc<Connection>, frame: Bytes) {
        debug!(
            alias = %self.name,
            peer = %conn.id(),
            size = frame.len(),
            data = %hex_preview(&frame, DEFAULT_PREVIEW_LEN),
            "frame received"
        );

        let payload = self.codec.decode(&frame);
        if !self.codec.validate(&payload) {
            debug!(peer = %conn.id(), "frame failed validation, dropped");
            return;
        }
        let Some(command) = self.codec.find_command(&payload) else {
            debug!(peer = %conn.id(), "frame without command, dropped");
            return;
        };

        if self.codec.is_call_in(&command) {
            let Some(handler) = self.call_ins.get(&command) else {
                debug!(peer = %conn.id(), command = %command, "no handler for call-in, dropped");
                return;
            };
            trace!(peer = %conn.id(), command = %command, "dispatching call-in");
            tokio::spawn(handler(payload, Arc::clone(conn)));
            return;
        }

        let Some(tx) = self.codec.find_transaction(&payload) else {
            debug!(peer = %conn.id(), command = %command, "reply without transaction, dropped");
            return;
        };
        match self.call_outs.take(conn.id(), &tx, None) {
            Some(pending) => pending.deliver(payload),
            None => {
                debug!(peer = %conn.id(), command = %command, tx = %tx, "unmatched reply, dropped")
            }
        }
    }

    fn frame_error(&self, conn: &Arc<Connection>, code: ErrorCode, data: Bytes) {
        debug!(
            alias = %self.name,
            peer = %conn.id(),
            code = %code,
            size = data.len(),
            data = %hex_preview(&data, DEFAULT_PREVIEW_LEN),
            "frame discarded"
        );
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("call_ins", &self.call_ins)
            .field("call_outs", &self.call_outs)
            .finish()
    }
}
