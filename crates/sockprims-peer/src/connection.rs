use std::fmt;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use sockprims_frame::{
    hex_preview, ErrorCode, FrameEvent, FrameParser, MessageCodec, DEFAULT_PREVIEW_LEN,
};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PeerError, Result};
use crate::sync::lock;

const READ_CHUNK_SIZE: usize = 1024;

/// Upper bound on bytes drained by one `receive` call, so one busy peer
/// cannot starve the others sharing the reactor.
const MAX_BURST_BYTES: usize = 64 * 1024;

/// Receives the events produced by a connection's parser.
pub trait FrameSink: Send + Sync {
    /// A complete frame arrived on `conn`.
    fn frame_received(&self, conn: &Arc<Connection>, frame: Bytes);

    /// A frame in progress on `conn` was discarded.
    fn frame_error(&self, conn: &Arc<Connection>, code: ErrorCode, data: Bytes);
}

/// One peer's byte stream plus its dedicated parser.
///
/// The receive side is driven by exactly one task (the reactor or a client's
/// read task); the send side may be used from any number of tasks and is
/// serialized per connection.
pub struct Connection {
    id: String,
    remote: Option<SocketAddr>,
    stream: Mutex<Option<Arc<TcpStream>>>,
    parser: Mutex<Box<dyn FrameParser>>,
    codec: Arc<dyn MessageCodec>,
    send_lock: tokio::sync::Mutex<()>,
    write_timeout: Duration,
    last_activity: Mutex<Instant>,
    stopped: AtomicBool,
    cancel: CancellationToken,
}

impl Connection {
    /// Bind a connected stream to a parser and codec.
    pub fn new(
        id: impl Into<String>,
        stream: TcpStream,
        parser: Box<dyn FrameParser>,
        codec: Arc<dyn MessageCodec>,
        write_timeout: Duration,
    ) -> Arc<Self> {
        let remote = stream.peer_addr().ok();
        Arc::new(Self {
            id: id.into(),
            remote,
            stream: Mutex::new(Some(Arc::new(stream))),
            parser: Mutex::new(parser),
            codec,
            send_lock: tokio::sync::Mutex::new(()),
            write_timeout,
            last_activity: Mutex::new(Instant::now()),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    /// Registry identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote address, if the OS reported one at creation.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Time since the last send or received byte.
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    /// Whether the connection has been inactive for longer than `threshold`.
    pub fn is_idle(&self, threshold: Duration) -> bool {
        self.idle_for() > threshold
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn stream(&self) -> Option<Arc<TcpStream>> {
        lock(&self.stream).clone()
    }

    /// Encode `payload` and write it, making up to `retries` attempts.
    ///
    /// An attempt fails when the write faults or stalls past the write
    /// timeout; the next attempt resumes from the first unwritten byte.
    /// Concurrent sends on one connection never interleave.
    pub async fn send(&self, payload: &[u8], retries: usize) -> Result<()> {
        let budget = retries.max(1);
        let encoded = self.codec.encode(payload);

        let _guard = self.send_lock.lock().await;
        self.touch();

        let mut written = 0usize;
        for attempt in 1..=budget {
            let Some(stream) = self.stream() else {
                return Err(PeerError::Disconnected(self.id.clone()));
            };

            let outcome = tokio::time::timeout(
                self.write_timeout,
                write_attempt(&stream, &encoded, &mut written),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {
                    self.touch();
                    debug!(
                        peer = %self.id,
                        size = encoded.len(),
                        data = %hex_preview(&encoded, DEFAULT_PREVIEW_LEN),
                        "sent"
                    );
                    return Ok(());
                }
                Ok(Err(err)) => {
                    debug!(peer = %self.id, attempt, written, error = %err, "send attempt failed");
                }
                Err(_) => {
                    debug!(peer = %self.id, attempt, written, "send attempt stalled");
                }
            }
        }

        Err(PeerError::SendFailed {
            peer: self.id.clone(),
            attempts: budget,
        })
    }

    /// Wait until the stream may have bytes to read.
    ///
    /// Returns `false` once the connection is stopped. Readiness errors
    /// return `true` so the following [`Connection::receive`] observes them.
    pub async fn readable(&self) -> bool {
        let Some(stream) = self.stream() else {
            return false;
        };
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = stream.readable() => !self.is_stopped(),
        }
    }

    /// Drain the bytes currently available, feeding the parser and `sink`.
    ///
    /// Never blocks. Returns `false` when the connection is stopped, the
    /// peer closed the stream, or the stream failed; frames completed before
    /// the close are still delivered.
    pub fn receive(self: &Arc<Self>, sink: &dyn FrameSink) -> bool {
        let Some(stream) = self.stream() else {
            return false;
        };

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut events = Vec::new();
        let mut drained = 0usize;
        let mut open = true;
        {
            let mut parser = lock(&self.parser);
            while drained < MAX_BURST_BYTES {
                match stream.try_read(&mut chunk) {
                    Ok(0) => {
                        debug!(peer = %self.id, "peer closed stream");
                        open = false;
                        break;
                    }
                    Ok(n) => {
                        drained += n;
                        events.extend(chunk[..n].iter().filter_map(|&byte| parser.consume(byte)));
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        debug!(peer = %self.id, error = %err, "read failed");
                        open = false;
                        break;
                    }
                }
            }
            parser.end_of_burst();
        }

        if drained > 0 {
            self.touch();
        }

        for event in events {
            match event {
                FrameEvent::Complete(frame) => sink.frame_received(self, frame),
                FrameEvent::Error { code, data } => sink.frame_error(self, code, data),
            }
        }

        open && !self.is_stopped()
    }

    /// Cancel readiness waits and release the stream.
    ///
    /// Returns `true` only for the call that actually stopped the connection.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        drop(lock(&self.stream).take());
        debug!(peer = %self.id, "connection stopped");
        true
    }
}

async fn write_attempt(stream: &TcpStream, buf: &[u8], written: &mut usize) -> io::Result<()> {
    while *written < buf.len() {
        stream.writable().await?;
        match stream.try_write(&buf[*written..]) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => *written += n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use sockprims_frame::{FrameMachine, Markers, TaggedCodec};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub(crate) fn markers() -> Markers {
        Markers::new(b"<<".to_vec(), b">>".to_vec()).unwrap()
    }

    pub(crate) async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn connection_pair() -> (Arc<Connection>, TcpStream) {
        let (local, remote) = tcp_pair().await;
        let conn = Connection::new(
            "peer-1",
            local,
            Box::new(FrameMachine::for_peer(markers(), "peer-1")),
            Arc::new(TaggedCodec::new(markers())),
            Duration::from_secs(2),
        );
        (conn, remote)
    }

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<FrameEvent>>,
    }

    impl FrameSink for CollectingSink {
        fn frame_received(&self, _conn: &Arc<Connection>, frame: Bytes) {
            lock(&self.events).push(FrameEvent::Complete(frame));
        }

        fn frame_error(&self, _conn: &Arc<Connection>, code: ErrorCode, data: Bytes) {
            lock(&self.events).push(FrameEvent::Error { code, data });
        }
    }

    impl CollectingSink {
        fn events(&self) -> Vec<FrameEvent> {
            lock(&self.events).clone()
        }
    }

    /// Pump the connection until `count` events arrived or it closed.
    async fn pump(conn: &Arc<Connection>, sink: &CollectingSink, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.events().len() < count && Instant::now() < deadline {
            if !conn.readable().await || !conn.receive(sink) {
                return false;
            }
        }
        true
    }

    #[tokio::test]
    async fn send_writes_encoded_frame() {
        let (conn, mut remote) = connection_pair().await;
        conn.send(b"PING|1|hi", 1).await.unwrap();

        let mut buf = vec![0u8; 13];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"<<PING|1|hi>>");
    }

    #[tokio::test]
    async fn receive_feeds_parser_in_order() {
        let (conn, mut remote) = connection_pair().await;
        let sink = CollectingSink::default();

        remote.write_all(b"xx<<a>><<b>q<<c>>").await.unwrap();
        assert!(pump(&conn, &sink, 3).await);

        assert_eq!(
            sink.events(),
            vec![
                FrameEvent::Complete(Bytes::from_static(b"<<a>>")),
                FrameEvent::Error {
                    code: ErrorCode::Tail,
                    data: Bytes::from_static(b"<<b>"),
                },
                FrameEvent::Complete(Bytes::from_static(b"<<c>>")),
            ]
        );
    }

    #[tokio::test]
    async fn frames_before_close_are_delivered() {
        let (conn, mut remote) = connection_pair().await;
        let sink = CollectingSink::default();

        remote.write_all(b"<<last>>").await.unwrap();
        remote.shutdown().await.unwrap();
        drop(remote);

        while conn.readable().await && conn.receive(&sink) {}

        assert_eq!(
            sink.events(),
            vec![FrameEvent::Complete(Bytes::from_static(b"<<last>>"))]
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_disables_io() {
        let (conn, _remote) = connection_pair().await;
        let sink = CollectingSink::default();

        assert!(conn.stop());
        assert!(!conn.stop());
        assert!(conn.is_stopped());
        assert!(!conn.readable().await);
        assert!(!conn.receive(&sink));
        assert!(matches!(
            conn.send(b"PING|1|x", 3).await,
            Err(PeerError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn stop_wakes_pending_readable() {
        let (conn, _remote) = connection_pair().await;
        let waiter = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.readable().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.stop();
        let ready = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("stop should wake the readiness wait")
            .unwrap();
        assert!(!ready);
    }

    #[tokio::test]
    async fn idle_clock_resets_on_traffic() {
        let (conn, mut remote) = connection_pair().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(conn.is_idle(Duration::from_millis(30)));

        conn.send(b"PING|1|x", 1).await.unwrap();
        assert!(!conn.is_idle(Duration::from_millis(30)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(conn.is_idle(Duration::from_millis(30)));

        let sink = CollectingSink::default();
        remote.write_all(b"?").await.unwrap();
        assert!(conn.readable().await);
        assert!(conn.receive(&sink));
        assert!(!conn.is_idle(Duration::from_millis(30)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_do_not_interleave() {
        let (conn, mut remote) = connection_pair().await;

        let reader = tokio::spawn(async move {
            let mut machine = FrameMachine::new(markers());
            let mut frames = Vec::new();
            let mut buf = vec![0u8; 4096];
            while frames.len() < 16 {
                let n = remote.read(&mut buf).await.unwrap();
                assert!(n > 0, "stream closed early");
                for event in machine.feed(&buf[..n]) {
                    match event {
                        FrameEvent::Complete(frame) => frames.push(frame),
                        other => panic!("unexpected {other:?}"),
                    }
                }
            }
            frames
        });

        let mut senders = Vec::new();
        for i in 0..16u8 {
            let conn = Arc::clone(&conn);
            senders.push(tokio::spawn(async move {
                let body = vec![b'a' + i; 32 * 1024];
                let payload = TaggedCodec::message("DATA", &i.to_string(), &body);
                conn.send(&payload, 3).await.unwrap();
            }));
        }
        for sender in senders {
            sender.await.unwrap();
        }

        let frames = reader.await.unwrap();
        for frame in frames {
            let payload = markers().strip(&frame).unwrap().to_vec();
            let body = TaggedCodec::body(&payload).unwrap();
            assert_eq!(body.len(), 32 * 1024);
            assert!(body.iter().all(|&b| b == body[0]));
        }
    }
}
