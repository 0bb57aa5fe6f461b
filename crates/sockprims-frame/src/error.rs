/// Errors that can occur while configuring framing.
///
/// Parsing itself never fails: malformed input is reported as
/// [`crate::FrameEvent::Error`] and the machine keeps going.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// A head or tail marker was empty.
    #[error("{which} marker must not be empty")]
    EmptyMarker { which: &'static str },

    /// Head and tail markers are identical.
    #[error("head and tail markers must differ")]
    SameMarkers,

    /// A marker given as hex text could not be parsed.
    #[error("invalid hex marker '{0}'")]
    InvalidHex(String),
}

pub type Result<T> = std::result::Result<T, FrameError>;
