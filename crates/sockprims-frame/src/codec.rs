use std::collections::HashSet;

use bytes::Bytes;

use crate::marker::Markers;

/// Separator between the fields of a [`TaggedCodec`] payload.
pub const FIELD_SEPARATOR: u8 = b'|';

/// Interprets frames for the correlation layer.
///
/// The connection layer treats payloads as opaque bytes; everything it needs
/// to know about message structure (wire encoding, integrity, command and
/// transaction identifiers) comes through this trait.
pub trait MessageCodec: Send + Sync {
    /// Encode a payload into wire bytes (a complete frame).
    fn encode(&self, payload: &[u8]) -> Bytes;

    /// Decode a completed frame into its payload.
    fn decode(&self, frame: &[u8]) -> Bytes;

    /// Structural check of a decoded payload (checksum, length, ...).
    fn validate(&self, payload: &[u8]) -> bool;

    /// Command identifier of a payload.
    fn find_command(&self, payload: &[u8]) -> Option<String>;

    /// Transaction identifier of a payload.
    fn find_transaction(&self, payload: &[u8]) -> Option<String>;

    /// Whether `command` is initiated by the peer (a call-in) rather than a reply.
    fn is_call_in(&self, command: &str) -> bool;
}

/// Small text codec used by the CLI and tests.
///
/// Wire: `head + payload + tail`. Payload: `command|transaction|body`, where
/// command and transaction are UTF-8 and the body is arbitrary bytes that
/// must not contain either marker.
#[derive(Debug, Clone)]
pub struct TaggedCodec {
    markers: Markers,
    call_ins: HashSet<String>,
}

impl TaggedCodec {
    /// Codec that classifies every command as a reply.
    pub fn new(markers: Markers) -> Self {
        Self {
            markers,
            call_ins: HashSet::new(),
        }
    }

    /// Classify `commands` as call-ins.
    pub fn with_call_ins<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.call_ins.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    /// Build a payload from its fields.
    pub fn message(command: &str, transaction: &str, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(command.len() + transaction.len() + body.len() + 2);
        out.extend_from_slice(command.as_bytes());
        out.push(FIELD_SEPARATOR);
        out.extend_from_slice(transaction.as_bytes());
        out.push(FIELD_SEPARATOR);
        out.extend_from_slice(body);
        out
    }

    /// The body of a payload (everything after the transaction field).
    pub fn body(payload: &[u8]) -> Option<&[u8]> {
        split_fields(payload).map(|(_, _, body)| body)
    }
}

fn split_fields(payload: &[u8]) -> Option<(&str, &str, &[u8])> {
    let mut parts = payload.splitn(3, |&b| b == FIELD_SEPARATOR);
    let command = std::str::from_utf8(parts.next()?).ok()?;
    let transaction = std::str::from_utf8(parts.next()?).ok()?;
    let body = parts.next()?;
    Some((command, transaction, body))
}

impl MessageCodec for TaggedCodec {
    fn encode(&self, payload: &[u8]) -> Bytes {
        self.markers.wrap(payload)
    }

    fn decode(&self, frame: &[u8]) -> Bytes {
        match self.markers.strip(frame) {
            Some(payload) => Bytes::copy_from_slice(payload),
            None => Bytes::new(),
        }
    }

    fn validate(&self, payload: &[u8]) -> bool {
        matches!(split_fields(payload), Some((cmd, tx, _)) if !cmd.is_empty() && !tx.is_empty())
    }

    fn find_command(&self, payload: &[u8]) -> Option<String> {
        split_fields(payload)
            .map(|(cmd, _, _)| cmd)
            .filter(|cmd| !cmd.is_empty())
            .map(str::to_string)
    }

    fn find_transaction(&self, payload: &[u8]) -> Option<String> {
        split_fields(payload)
            .map(|(_, tx, _)| tx)
            .filter(|tx| !tx.is_empty())
            .map(str::to_string)
    }

    fn is_call_in(&self, command: &str) -> bool {
        self.call_ins.contains(command)
    }
}
