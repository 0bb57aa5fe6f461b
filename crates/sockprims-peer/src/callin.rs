//! Handlers for peer-initiated commands.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::connection::Connection;

/// Handler invoked with the decoded payload and the originating connection.
pub type CallInHandler =
    Arc<dyn Fn(Bytes, Arc<Connection>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Command id to handler map.
#[derive(Default)]
pub struct CallInRegistry {
    handlers: RwLock<HashMap<String, CallInHandler>>,
}

impl CallInRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `command`, replacing any previous handler.
    pub fn register<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(Bytes, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: CallInHandler = Arc::new(move |payload, conn| handler(payload, conn).boxed());
        self.write().insert(command.into(), handler);
    }

    /// Remove the handler for `command`, returning whether one was registered.
    pub fn unregister(&self, command: &str) -> bool {
        self.write().remove(command).is_some()
    }

    pub fn get(&self, command: &str) -> Option<CallInHandler> {
        self.read().get(command).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        let mut commands: Vec<String> = self.read().keys().cloned().collect();
        commands.sort();
        commands
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CallInHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CallInHandler>> {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for CallInRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallInRegistry")
            .field("commands", &self.commands())
            .finish()
    }
}
