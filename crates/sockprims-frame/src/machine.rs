use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::marker::Markers;

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Why a frame in progress was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A partial head match was broken.
    Head,
    /// The head marker appeared again inside a body before any tail.
    HeadRepeat,
    /// A partial tail match was broken.
    Tail,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCode::Head => "ERR_HEAD",
            ErrorCode::HeadRepeat => "ERR_HEAD_REPEAT",
            ErrorCode::Tail => "ERR_TAIL",
        })
    }
}

/// Output of the frame state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete frame: head + payload + tail.
    Complete(Bytes),
    /// A frame in progress was discarded; `data` holds the discarded bytes.
    Error { code: ErrorCode, data: Bytes },
}

/// Parser position. Each variant carries the number of marker bytes matched so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for the first head byte.
    Idle,
    /// Inside the head marker.
    Head { matched: usize },
    /// Accumulating payload; `head_matched` tracks a head marker recurring in the body.
    Body { head_matched: usize },
    /// Inside the tail marker.
    Tail { matched: usize },
}

/// A per-connection byte-at-a-time frame parser.
///
/// Implementations are owned by exactly one connection and fed sequentially.
pub trait FrameParser: Send {
    /// Consume one byte. Emits at most one event.
    fn consume(&mut self, byte: u8) -> Option<FrameEvent>;

    /// No more bytes are immediately available. Never forces completion.
    fn end_of_burst(&mut self) {}

    /// Consume a chunk of bytes, collecting events in order.
    fn feed(&mut self, bytes: &[u8]) -> Vec<FrameEvent> {
        bytes.iter().filter_map(|&byte| self.consume(byte)).collect()
    }
}

/// Head/tail delimiting state machine.
///
/// A byte that breaks a partial head or tail match is replayed once as a
/// possible start of a new head, so a frame starting right after a broken
/// one is not lost.
#[derive(Debug)]
pub struct FrameMachine {
    peer: String,
    markers: Markers,
    state: ParserState,
    buf: BytesMut,
}

impl FrameMachine {
    /// Create a machine that is not bound to a named peer.
    pub fn new(markers: Markers) -> Self {
        Self::for_peer(markers, "-")
    }

    /// Create a machine bound to a connection identity (used in log output).
    pub fn for_peer(markers: Markers, peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            markers,
            state: ParserState::Idle,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Current parser position.
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Number of bytes held for the frame in progress.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Connection identity this machine is bound to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Drop any frame in progress and return to `Idle`.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = ParserState::Idle;
    }

    fn idle(&mut self, byte: u8) {
        let head = self.markers.head();
        if byte != head[0] {
            self.state = ParserState::Idle;
            return;
        }
        self.buf.put_u8(byte);
        self.state = if head.len() == 1 {
            ParserState::Body { head_matched: 0 }
        } else {
            ParserState::Head { matched: 1 }
        };
    }

    fn head(&mut self, matched: usize, byte: u8) -> Option<FrameEvent> {
        let head_len = self.markers.head().len();
        if byte == self.markers.head()[matched] {
            self.buf.put_u8(byte);
            self.state = if matched + 1 == head_len {
                ParserState::Body { head_matched: 0 }
            } else {
                ParserState::Head {
                    matched: matched + 1,
                }
            };
            return None;
        }

        let data = self.buf.split().freeze();
        self.idle(byte);
        Some(FrameEvent::Error {
            code: ErrorCode::Head,
            data,
        })
    }

    fn body(&mut self, head_matched: usize, byte: u8) -> Option<FrameEvent> {
        let next = self.markers.advance_head(head_matched, byte);

        if next == self.markers.head().len() {
            // Abandon the frame in progress; the recurring head starts a new one.
            self.buf.put_u8(byte);
            let data = self.buf.split().freeze();
            self.buf.extend_from_slice(self.markers.head());
            self.state = ParserState::Body { head_matched: 0 };
            return Some(FrameEvent::Error {
                code: ErrorCode::HeadRepeat,
                data,
            });
        }

        if byte == self.markers.tail()[0] {
            return self.tail(0, byte);
        }

        self.buf.put_u8(byte);
        self.state = ParserState::Body { head_matched: next };
        None
    }

    fn tail(&mut self, matched: usize, byte: u8) -> Option<FrameEvent> {
        let tail_len = self.markers.tail().len();
        if byte == self.markers.tail()[matched] {
            self.buf.put_u8(byte);
            if matched + 1 == tail_len {
                self.state = ParserState::Idle;
                return Some(FrameEvent::Complete(self.buf.split().freeze()));
            }
            self.state = ParserState::Tail {
                matched: matched + 1,
            };
            return None;
        }

        let data = self.buf.split().freeze();
        self.idle(byte);
        Some(FrameEvent::Error {
            code: ErrorCode::Tail,
            data,
        })
    }
}

impl FrameParser for FrameMachine {
    fn consume(&mut self, byte: u8) -> Option<FrameEvent> {
        match self.state {
            ParserState::Idle => {
                self.idle(byte);
                None
            }
            ParserState::Head { matched } => self.head(matched, byte),
            ParserState::Body { head_matched } => self.body(head_matched, byte),
            ParserState::Tail { matched } => self.tail(matched, byte),
        }
    }

    fn end_of_burst(&mut self) {
        if !self.buf.is_empty() {
            trace!(
                peer = %self.peer,
                state = ?self.state,
                buffered = self.buf.len(),
                "end of burst with partial frame"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> FrameMachine {
        FrameMachine::new(Markers::new(b"<<".to_vec(), b">>".to_vec()).unwrap())
    }

    fn complete(bytes: &[u8]) -> FrameEvent {
        FrameEvent::Complete(Bytes::copy_from_slice(bytes))
    }

    fn error(code: ErrorCode, bytes: &[u8]) -> FrameEvent {
        FrameEvent::Error {
            code,
            data: Bytes::copy_from_slice(bytes),
        }
    }

    #[test]
    fn well_formed_frame_completes_once() {
        let mut m = machine();
        let events = m.feed(b"<<hello>>");
        assert_eq!(events, vec![complete(b"<<hello>>")]);
        assert_eq!(m.state(), ParserState::Idle);
        assert_eq!(m.buffered(), 0);
    }

    #[test]
    fn leading_garbage_is_discarded_silently() {
        let mut m = machine();
        let events = m.feed(b"xyz<<a>>");
        assert_eq!(events, vec![complete(b"<<a>>")]);
    }

    #[test]
    fn back_to_back_frames() {
        let mut m = machine();
        let events = m.feed(b"<<one>><<two>>noise<<three>>");
        assert_eq!(
            events,
            vec![complete(b"<<one>>"), complete(b"<<two>>"), complete(b"<<three>>")]
        );
    }

    #[test]
    fn head_repeat_keeps_second_frame() {
        let mut m = machine();
        let events = m.feed(b"<<partial<<payload>>");
        assert_eq!(
            events,
            vec![
                error(ErrorCode::HeadRepeat, b"<<partial<<"),
                complete(b"<<payload>>"),
            ]
        );
    }

    #[test]
    fn head_repeat_with_self_overlapping_head() {
        let mut m = FrameMachine::new(Markers::new(b"AAB".to_vec(), b"Z".to_vec()).unwrap());
        let events = m.feed(b"AABxAAAByZ");
        assert_eq!(
            events,
            vec![
                error(ErrorCode::HeadRepeat, b"AABxAAAB"),
                complete(b"AAByZ"),
            ]
        );
    }

    #[test]
    fn corrupted_tail_resyncs_on_next_frame() {
        let mut m = machine();
        let events = m.feed(b"<<payload>x<<next>>");
        assert_eq!(
            events,
            vec![error(ErrorCode::Tail, b"<<payload>"), complete(b"<<next>>")]
        );
    }

    #[test]
    fn tail_mismatch_on_head_byte_starts_new_frame() {
        let mut m = machine();
        let events = m.feed(b"<<p><<q>>");
        assert_eq!(
            events,
            vec![error(ErrorCode::Tail, b"<<p>"), complete(b"<<q>>")]
        );
    }

    #[test]
    fn broken_head_replays_byte() {
        let mut m = FrameMachine::new(Markers::new(b"AB".to_vec(), b"YZ".to_vec()).unwrap());
        let events = m.feed(b"AABxYZ");
        assert_eq!(events, vec![error(ErrorCode::Head, b"A"), complete(b"ABxYZ")]);
    }

    #[test]
    fn broken_head_without_restart_goes_idle() {
        let mut m = machine();
        assert_eq!(m.feed(b"<x"), vec![error(ErrorCode::Head, b"<")]);
        assert_eq!(m.state(), ParserState::Idle);
        assert_eq!(m.buffered(), 0);
    }

    #[test]
    fn single_byte_markers() {
        let mut m = FrameMachine::new(Markers::new(vec![0x02], vec![0x03]).unwrap());
        let events = m.feed(&[0x02, b'a', 0x02, b'b', 0x03, 0xff, 0x02, 0x03]);
        assert_eq!(
            events,
            vec![
                error(ErrorCode::HeadRepeat, &[0x02, b'a', 0x02]),
                complete(&[0x02, b'b', 0x03]),
                complete(&[0x02, 0x03]),
            ]
        );
    }

    #[test]
    fn end_of_burst_holds_partial_frame() {
        let mut m = machine();
        assert!(m.feed(b"<<hal").is_empty());
        m.end_of_burst();
        assert_eq!(m.state(), ParserState::Body { head_matched: 0 });
        assert_eq!(m.buffered(), 5);
        assert_eq!(m.feed(b"f>>"), vec![complete(b"<<half>>")]);
    }

    #[test]
    fn reset_discards_frame_in_progress() {
        let mut m = machine();
        m.feed(b"<<abc>");
        m.reset();
        assert_eq!(m.state(), ParserState::Idle);
        assert_eq!(m.feed(b">>"), Vec::new());
    }

    fn assert_chunk_independent(markers: Markers, stream: &[u8]) {
        let machine = || FrameMachine::new(markers.clone());

        let mut reference = machine();
        let expected: Vec<FrameEvent> = stream
            .iter()
            .filter_map(|&byte| reference.consume(byte))
            .collect();
        assert!(expected.len() > 5);

        for split in 0..=stream.len() {
            let mut m = machine();
            let mut events = m.feed(&stream[..split]);
            m.end_of_burst();
            events.extend(m.feed(&stream[split..]));
            assert_eq!(events, expected, "split at {split}");
        }

        for chunk in [1usize, 2, 3, 5, 7, 11, 64] {
            let mut m = machine();
            let mut events = Vec::new();
            for piece in stream.chunks(chunk) {
                events.extend(m.feed(piece));
                m.end_of_burst();
            }
            assert_eq!(events, expected, "chunk size {chunk}");
        }
    }

    #[test]
    fn chunk_boundary_independence() {
        assert_chunk_independent(
            Markers::new(b"<<".to_vec(), b">>".to_vec()).unwrap(),
            b"junk<<one>><x<<two<<three>>>><<four>y<<five>>~<<si<<<x>>>><<end>>tail<<",
        );
        assert_chunk_independent(
            Markers::new(b"AAB".to_vec(), b"ZY".to_vec()).unwrap(),
            b"xxAABoneZYAAAABtwoZYAABpAAAABqZYzAABAAZYAABAZxAABrZY",
        );
    }

    #[test]
    fn error_codes_display_like_wire_names() {
        assert_eq!(ErrorCode::Head.to_string(), "ERR_HEAD");
        assert_eq!(ErrorCode::HeadRepeat.to_string(), "ERR_HEAD_REPEAT");
        assert_eq!(ErrorCode::Tail.to_string(), "ERR_TAIL");
    }
}
