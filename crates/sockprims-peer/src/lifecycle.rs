use std::sync::{Arc, Mutex};

use crate::connection::Connection;
use crate::sync::lock;

/// Observer of connection lifecycle events.
///
/// Called inline from the reactor task; implementations must not block.
pub trait ConnectionListener: Send + Sync {
    fn connected(&self, _conn: &Arc<Connection>) {}
    fn disconnected(&self, _conn: &Arc<Connection>) {}
}

#[derive(Default)]
pub(crate) struct Listeners {
    inner: Mutex<Vec<Arc<dyn ConnectionListener>>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: Arc<dyn ConnectionListener>) {
        lock(&self.inner).push(listener);
    }

    pub(crate) fn remove(&self, listener: &Arc<dyn ConnectionListener>) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.len();
        inner.retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        inner.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub(crate) fn connected(&self, conn: &Arc<Connection>) {
        for listener in self.snapshot() {
            listener.connected(conn);
        }
    }

    pub(crate) fn disconnected(&self, conn: &Arc<Connection>) {
        for listener in self.snapshot() {
            listener.disconnected(conn);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn ConnectionListener>> {
        lock(&self.inner).clone()
    }
}
