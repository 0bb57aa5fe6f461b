//! Parser factories.

use crate::machine::{FrameMachine, FrameParser};
use crate::marker::Markers;

/// Creates one fresh [`FrameParser`] per connection.
///
/// Parsers hold per-stream state and are never shared between connections.
pub trait Protocol: Send + Sync {
    /// Alias used in log output.
    fn name(&self) -> &str;

    /// Create a parser bound to the connection identified by `peer_id`.
    fn create_parser(&self, peer_id: &str) -> Box<dyn FrameParser>;
}

/// Protocol whose frames are delimited by a head and a tail marker.
#[derive(Debug, Clone)]
pub struct HeadTailProtocol {
    name: String,
    markers: Markers,
}

impl HeadTailProtocol {
    pub fn new(name: impl Into<String>, markers: Markers) -> Self {
        Self {
            name: name.into(),
            markers,
        }
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }
}

impl Protocol for HeadTailProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_parser(&self, peer_id: &str) -> Box<dyn FrameParser> {
        Box::new(FrameMachine::for_peer(self.markers.clone(), peer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::FrameEvent;

    #[test]
    fn parsers_do_not_share_state() {
        let protocol = HeadTailProtocol::new(
            "ht",
            Markers::new(b"[".to_vec(), b"]".to_vec()).unwrap(),
        );
        let mut a = protocol.create_parser("a");
        let mut b = protocol.create_parser("b");

        assert!(a.feed(b"[from-a").is_empty());
        assert_eq!(
            b.feed(b"[from-b]"),
            vec![FrameEvent::Complete(bytes::Bytes::from_static(b"[from-b]"))]
        );
        assert_eq!(
            a.feed(b"]"),
            vec![FrameEvent::Complete(bytes::Bytes::from_static(b"[from-a]"))]
        );
        assert_eq!(protocol.name(), "ht");
    }
}
