//! Pending call-outs awaiting a reply.
//!
//! Every pending entry is resolved exactly once: by its reply, by its
//! timeout, or by its connection going away. All three paths remove the
//! entry through [`CallOutTable::take`] (or [`CallOutTable::remove_peer`])
//! under one guard, so whichever path removes it owns the resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{PeerError, Result};
use crate::sync::lock;

/// Receives the outcome of a callback-mode request.
///
/// Both methods run on a tokio task of their own; at most one of them is
/// called per request.
pub trait CallOutHandler: Send + Sync {
    fn on_reply(&self, payload: Bytes);
    fn on_timeout(&self);
}

/// [`CallOutHandler`] built from two closures.
pub struct FnHandler<R, T> {
    reply: R,
    timeout: T,
}

impl<R, T> CallOutHandler for FnHandler<R, T>
where
    R: Fn(Bytes) + Send + Sync,
    T: Fn() + Send + Sync,
{
    fn on_reply(&self, payload: Bytes) {
        (self.reply)(payload)
    }

    fn on_timeout(&self) {
        (self.timeout)()
    }
}

/// Wrap a pair of closures as a shared [`CallOutHandler`].
pub fn handler_fn<R, T>(on_reply: R, on_timeout: T) -> Arc<dyn CallOutHandler>
where
    R: Fn(Bytes) + Send + Sync + 'static,
    T: Fn() + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        reply: on_reply,
        timeout: on_timeout,
    })
}

/// Identifies one registration; a newer registration under the same
/// `(peer, tx)` never matches an older token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub peer: String,
    pub tx: String,
    pub token: u64,
}

pub(crate) enum Slot {
    Waiter(oneshot::Sender<Result<Bytes>>),
    Callback(Arc<dyn CallOutHandler>),
}

/// A removed entry; the holder owns its resolution.
pub struct PendingCallOut {
    registration: Registration,
    created: Instant,
    timeout: Duration,
    /// `None` when `created + timeout` is not representable.
    deadline: Option<Instant>,
    slot: Slot,
}

impl PendingCallOut {
    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Resolve with a reply payload.
    pub fn deliver(self, payload: Bytes) {
        debug!(
            peer = %self.registration.peer,
            tx = %self.registration.tx,
            elapsed_ms = self.age().as_millis() as u64,
            late = self.deadline.is_some_and(|deadline| Instant::now() > deadline),
            "reply matched"
        );
        match self.slot {
            Slot::Waiter(sender) => {
                let _ = sender.send(Ok(payload));
            }
            Slot::Callback(handler) => detach(move || handler.on_reply(payload)),
        }
    }

    /// Resolve by timeout. Callbacks run inline on the calling task.
    pub fn expire(self) {
        debug!(
            peer = %self.registration.peer,
            tx = %self.registration.tx,
            "call-out timed out"
        );
        match self.slot {
            Slot::Waiter(sender) => {
                let _ = sender.send(Err(PeerError::Timeout(self.timeout)));
            }
            Slot::Callback(handler) => handler.on_timeout(),
        }
    }

    /// Resolve because the connection went away.
    pub fn abandon(self) {
        debug!(
            peer = %self.registration.peer,
            tx = %self.registration.tx,
            "call-out abandoned by disconnect"
        );
        match self.slot {
            Slot::Waiter(sender) => {
                let _ = sender.send(Err(PeerError::Disconnected(self.registration.peer)));
            }
            Slot::Callback(handler) => detach(move || handler.on_timeout()),
        }
    }
}

/// Run `f` on its own task, or inline when no runtime is available
/// (e.g. while a server is dropped outside of one).
fn detach(f: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { f() });
        }
        Err(_) => f(),
    }
}

impl fmt::Debug for PendingCallOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.slot {
            Slot::Waiter(_) => "waiter",
            Slot::Callback(_) => "callback",
        };
        f.debug_struct("PendingCallOut")
            .field("registration", &self.registration)
            .field("kind", &kind)
            .finish()
    }
}

/// Pending call-outs keyed by peer identity, then transaction id.
#[derive(Default)]
pub struct CallOutTable {
    pending: Mutex<HashMap<String, HashMap<String, PendingCallOut>>>,
    next_token: AtomicU64,
}

impl CallOutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blocking waiter; the receiver yields the reply, a timeout
    /// or a disconnect.
    pub fn register_waiter(
        &self,
        peer: &str,
        tx: &str,
        timeout: Duration,
    ) -> Result<(Registration, oneshot::Receiver<Result<Bytes>>)> {
        let (sender, receiver) = oneshot::channel();
        let registration = self.insert(peer, tx, timeout, Slot::Waiter(sender))?;
        Ok((registration, receiver))
    }

    /// Register a callback.
    pub fn register_callback(
        &self,
        peer: &str,
        tx: &str,
        timeout: Duration,
        handler: Arc<dyn CallOutHandler>,
    ) -> Result<Registration> {
        self.insert(peer, tx, timeout, Slot::Callback(handler))
    }

    fn insert(&self, peer: &str, tx: &str, timeout: Duration, slot: Slot) -> Result<Registration> {
        let registration = Registration {
            peer: peer.to_string(),
            tx: tx.to_string(),
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
        };
        let created = Instant::now();

        let mut pending = lock(&self.pending);
        let by_tx = pending.entry(peer.to_string()).or_default();
        if by_tx.contains_key(tx) {
            return Err(PeerError::DuplicateTransaction {
                peer: peer.to_string(),
                tx: tx.to_string(),
            });
        }
        by_tx.insert(
            tx.to_string(),
            PendingCallOut {
                registration: registration.clone(),
                created,
                timeout,
                deadline: created.checked_add(timeout),
                slot,
            },
        );
        Ok(registration)
    }

    /// Atomically remove the entry for `(peer, tx)`.
    ///
    /// With `token`, the entry is removed only if it is that registration;
    /// without, any entry matches (reply path).
    pub fn take(&self, peer: &str, tx: &str, token: Option<u64>) -> Option<PendingCallOut> {
        let mut pending = lock(&self.pending);
        let by_tx = pending.get_mut(peer)?;
        let matches = by_tx
            .get(tx)
            .is_some_and(|entry| token.is_none_or(|t| entry.registration.token == t));
        if !matches {
            return None;
        }
        let entry = by_tx.remove(tx);
        if by_tx.is_empty() {
            pending.remove(peer);
        }
        entry
    }

    /// Remove a specific registration.
    pub fn take_registration(&self, registration: &Registration) -> Option<PendingCallOut> {
        self.take(&registration.peer, &registration.tx, Some(registration.token))
    }

    /// Remove every entry of `peer`, resolving each as abandoned.
    pub fn remove_peer(&self, peer: &str) -> usize {
        let removed = lock(&self.pending).remove(peer);
        let Some(removed) = removed else {
            return 0;
        };
        let count = removed.len();
        for entry in removed.into_values() {
            entry.abandon();
        }
        count
    }

    /// Total pending entries.
    pub fn len(&self) -> usize {
        lock(&self.pending).values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending entries for one peer.
    pub fn pending_for(&self, peer: &str) -> usize {
        lock(&self.pending).get(peer).map_or(0, HashMap::len)
    }
}

impl fmt::Debug for CallOutTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOutTable")
            .field("pending", &self.len())
            .finish()
    }
}

/// Removes its registration when dropped, unless already resolved.
///
/// Held by blocking requests across every await point so that send
/// failure, timeout and cancellation all leave the table clean.
pub struct PendingGuard<'a> {
    table: &'a CallOutTable,
    registration: Registration,
}

impl<'a> PendingGuard<'a> {
    pub fn new(table: &'a CallOutTable, registration: Registration) -> Self {
        Self {
            table,
            registration,
        }
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        drop(self.table.take_registration(&self.registration));
    }
}
