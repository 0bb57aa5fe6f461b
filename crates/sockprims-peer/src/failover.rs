//! Rotation across an ordered set of single-endpoint clients.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, warn};

use crate::callout::CallOutHandler;
use crate::error::{PeerError, Result};

/// A client of one endpoint, as seen by [`FailoverClient`].
pub trait ClientEndpoint: Send + Sync {
    /// Alias used in log output.
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Connect unless connected; `true` if a connection is up afterwards.
    fn try_connect(&self) -> impl Future<Output = bool> + Send;

    fn disconnect(&self) -> impl Future<Output = ()> + Send;

    fn send(&self, payload: &[u8]) -> impl Future<Output = Result<()>> + Send;

    fn request(&self, payload: &[u8]) -> impl Future<Output = Result<Bytes>> + Send;

    fn request_with_callback(
        &self,
        payload: &[u8],
        handler: Arc<dyn CallOutHandler>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Applies each operation to the active client, moving on to the next one
/// whenever it fails.
///
/// One operation visits every client at most once, starting from the
/// active one; if all of them fail the last error is returned and the
/// active client is back where the operation started.
#[derive(Debug)]
pub struct FailoverClient<C> {
    clients: Vec<C>,
    active: AtomicUsize,
}

impl<C: ClientEndpoint> FailoverClient<C> {
    pub fn new(clients: Vec<C>) -> Result<Self> {
        if clients.is_empty() {
            return Err(PeerError::NoClients);
        }
        Ok(Self {
            clients,
            active: AtomicUsize::new(0),
        })
    }

    pub fn clients(&self) -> &[C] {
        &self.clients
    }

    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn active(&self) -> &C {
        &self.clients[self.active_index()]
    }

    /// Make the next client active, returning its index.
    pub fn switch_client(&self) -> usize {
        let next = (self.active_index() + 1) % self.clients.len();
        self.active.store(next, Ordering::Release);
        info!(client = %self.clients[next].name(), index = next, "switched client");
        next
    }

    pub fn is_connected(&self) -> bool {
        self.active().is_connected()
    }

    /// Disconnect the active client.
    pub async fn disconnect(&self) {
        self.active().disconnect().await;
    }

    /// Connect the active client, rotating until one connects.
    pub async fn try_connect(&self) -> bool {
        self.rotate("connect", |_| async { Ok(()) }).await.is_ok()
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        self.rotate("send", |client| client.send(payload)).await
    }

    pub async fn request(&self, payload: &[u8]) -> Result<Bytes> {
        self.rotate("request", |client| client.request(payload)).await
    }

    pub async fn request_with_callback(
        &self,
        payload: &[u8],
        handler: Arc<dyn CallOutHandler>,
    ) -> Result<()> {
        self.rotate("request", |client| {
            client.request_with_callback(payload, Arc::clone(&handler))
        })
        .await
    }

    async fn rotate<'a, T, F, Fut>(&'a self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut(&'a C) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let count = self.clients.len();
        let start = self.active_index();
        let mut last_error = PeerError::NoClients;

        for step in 0..count {
            let index = (start + step) % count;
            self.active.store(index, Ordering::Release);
            let client = &self.clients[index];

            let outcome = if client.is_connected() || client.try_connect().await {
                attempt(client).await
            } else {
                Err(PeerError::NotConnected(client.name().to_string()))
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_request_error() => return Err(err),
                Err(err) => {
                    warn!(
                        client = %client.name(),
                        operation,
                        error = %err,
                        "client failed, switching"
                    );
                    client.disconnect().await;
                    last_error = err;
                }
            }
        }

        self.active.store(start, Ordering::Release);
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::callout::handler_fn;

    /// Scripted endpoint that records every call it receives.
    struct Scripted {
        name: String,
        reachable: bool,
        fails_requests: bool,
        connected: AtomicBool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Scripted {
        fn new(
            name: &str,
            reachable: bool,
            fails_requests: bool,
            log: &Arc<Mutex<Vec<String>>>,
        ) -> Self {
            Self {
                name: name.to_string(),
                reachable,
                fails_requests,
                connected: AtomicBool::new(false),
                log: Arc::clone(log),
            }
        }

        fn record(&self, what: &str) {
            self.log.lock().unwrap().push(format!("{}:{what}", self.name));
        }

        fn outcome(&self) -> Result<()> {
            if self.fails_requests {
                Err(PeerError::SendFailed {
                    peer: self.name.clone(),
                    attempts: 1,
                })
            } else {
                Ok(())
            }
        }
    }

    impl ClientEndpoint for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn try_connect(&self) -> bool {
            self.record("connect");
            self.connected.store(self.reachable, Ordering::SeqCst);
            self.reachable
        }

        async fn disconnect(&self) {
            self.record("disconnect");
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn send(&self, _payload: &[u8]) -> Result<()> {
            self.record("send");
            self.outcome()
        }

        async fn request(&self, payload: &[u8]) -> Result<Bytes> {
            self.record("request");
            if payload.is_empty() {
                return Err(PeerError::InvalidRequest("no transaction id".to_string()));
            }
            self.outcome().map(|()| Bytes::copy_from_slice(payload))
        }

        async fn request_with_callback(
            &self,
            _payload: &[u8],
            _handler: Arc<dyn CallOutHandler>,
        ) -> Result<()> {
            self.record("callback");
            self.outcome()
        }
    }

    fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn empty_client_list_is_rejected() {
        assert!(matches!(
            FailoverClient::<Scripted>::new(Vec::new()),
            Err(PeerError::NoClients)
        ));
    }

    #[tokio::test]
    async fn every_failing_client_is_tried_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failover = FailoverClient::new(vec![
            Scripted::new("a", true, true, &log),
            Scripted::new("b", false, false, &log),
            Scripted::new("c", true, true, &log),
        ])
        .unwrap();

        let err = failover.send(b"x").await.unwrap_err();
        assert!(matches!(err, PeerError::SendFailed { ref peer, .. } if peer == "c"));
        assert_eq!(
            entries(&log),
            vec![
                "a:connect",
                "a:send",
                "a:disconnect",
                "b:connect",
                "b:disconnect",
                "c:connect",
                "c:send",
                "c:disconnect",
            ]
        );
        assert_eq!(failover.active_index(), 0);
    }

    #[tokio::test]
    async fn failure_moves_to_next_working_client() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failover = FailoverClient::new(vec![
            Scripted::new("a", false, false, &log),
            Scripted::new("b", true, false, &log),
        ])
        .unwrap();

        let reply = failover.request(b"q").await.unwrap();
        assert_eq!(reply.as_ref(), b"q");
        assert_eq!(failover.active_index(), 1);

        // Already connected: no reconnect on the next call.
        log.lock().unwrap().clear();
        failover
            .request_with_callback(b"q", handler_fn(|_| {}, || {}))
            .await
            .unwrap();
        assert_eq!(entries(&log), vec!["b:callback"]);
    }

    #[tokio::test]
    async fn rejected_request_does_not_fail_over() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failover = FailoverClient::new(vec![
            Scripted::new("a", true, false, &log),
            Scripted::new("b", true, false, &log),
        ])
        .unwrap();

        let err = failover.request(b"").await.unwrap_err();
        assert!(matches!(err, PeerError::InvalidRequest(_)));
        assert_eq!(entries(&log), vec!["a:connect", "a:request"]);
        assert_eq!(failover.active_index(), 0);
        assert!(failover.is_connected());
    }

    #[test]
    fn request_errors_are_classified() {
        assert!(PeerError::InvalidRequest("x".to_string()).is_request_error());
        assert!(PeerError::DuplicateTransaction {
            peer: "p".to_string(),
            tx: "1".to_string(),
        }
        .is_request_error());
        assert!(!PeerError::Timeout(Duration::from_secs(1)).is_request_error());
        assert!(!PeerError::NotConnected("a".to_string()).is_request_error());
    }

    #[tokio::test]
    async fn rotation_starts_from_active_client() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failover = FailoverClient::new(vec![
            Scripted::new("a", true, false, &log),
            Scripted::new("b", true, true, &log),
            Scripted::new("c", true, false, &log),
        ])
        .unwrap();

        assert_eq!(failover.switch_client(), 1);
        failover.send(b"x").await.unwrap();
        assert_eq!(failover.active_index(), 2);
        assert_eq!(
            entries(&log),
            vec!["b:connect", "b:send", "b:disconnect", "c:connect", "c:send"]
        );

        assert_eq!(failover.switch_client(), 0);
        assert!(failover.try_connect().await);
        assert!(failover.is_connected());
        failover.disconnect().await;
        assert!(!failover.is_connected());
    }
}
