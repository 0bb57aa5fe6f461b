//! Head/tail marker framing for byte streams.
//!
//! Frames are delimited by a configurable head marker and tail marker:
//!
//! ```text
//! ┌──────────────┬─────────────────────┬──────────────┐
//! │ Head marker  │ Payload             │ Tail marker  │
//! │ (1..n bytes) │ (opaque, any length)│ (1..n bytes) │
//! └──────────────┴─────────────────────┴──────────────┘
//! ```
//!
//! The [`FrameMachine`] consumes a stream one byte at a time and
//! resynchronizes on malformed input without losing later valid frames.
//! What a frame *means* is decided by a [`MessageCodec`].

pub mod codec;
pub mod error;
pub mod hex;
pub mod machine;
pub mod marker;
pub mod protocol;

pub use codec::{MessageCodec, TaggedCodec, FIELD_SEPARATOR};
pub use error::{FrameError, Result};
pub use hex::{hex_preview, DEFAULT_PREVIEW_LEN};
pub use machine::{ErrorCode, FrameEvent, FrameMachine, FrameParser, ParserState};
pub use marker::Markers;
pub use protocol::{HeadTailProtocol, Protocol};
