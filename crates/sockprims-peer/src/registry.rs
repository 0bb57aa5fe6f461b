use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection::Connection;
use crate::sync::lock;

/// Identity-keyed set of live connections.
///
/// The guard is held only for the mutation or copy itself; bulk operations
/// take a snapshot and act on it outside the guard.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<BTreeMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under its identity, returning any connection it displaced.
    pub fn insert(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        lock(&self.inner).insert(conn.id().to_string(), conn)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        lock(&self.inner).get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        lock(&self.inner).remove(id)
    }

    /// Remove `conn` only if it is still the entry registered under its identity.
    pub fn remove_if_same(&self, conn: &Arc<Connection>) -> bool {
        let mut inner = lock(&self.inner);
        match inner.get(conn.id()) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                inner.remove(conn.id());
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        lock(&self.inner).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    /// Identities in order.
    pub fn ids(&self) -> Vec<String> {
        lock(&self.inner).keys().cloned().collect()
    }

    /// Copy of every registered connection, in identity order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        lock(&self.inner).values().cloned().collect()
    }

    /// Connections idle longer than `threshold`.
    pub fn idle(&self, threshold: Duration) -> Vec<Arc<Connection>> {
        self.snapshot()
            .into_iter()
            .filter(|conn| conn.is_idle(threshold))
            .collect()
    }

    /// Remove and return every connection.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        std::mem::take(&mut *lock(&self.inner)).into_values().collect()
    }
}
