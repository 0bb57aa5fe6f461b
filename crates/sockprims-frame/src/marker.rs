//! Head and tail markers.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{FrameError, Result};

/// The head and tail byte sequences that delimit a frame.
///
/// Configured once per protocol instance and shared (cheaply cloned) by
/// every parser it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    head: Bytes,
    tail: Bytes,
    /// `head_prefix[i]`: length of the longest proper prefix of `head[..=i]`
    /// that is also its suffix.
    head_prefix: Arc<[usize]>,
}

impl Markers {
    /// Create a marker pair. Both must be non-empty and differ.
    pub fn new(head: impl Into<Bytes>, tail: impl Into<Bytes>) -> Result<Self> {
        let head = head.into();
        let tail = tail.into();
        if head.is_empty() {
            return Err(FrameError::EmptyMarker { which: "head" });
        }
        if tail.is_empty() {
            return Err(FrameError::EmptyMarker { which: "tail" });
        }
        if head == tail {
            return Err(FrameError::SameMarkers);
        }
        let head_prefix = prefix_table(&head).into();
        Ok(Self {
            head,
            tail,
            head_prefix,
        })
    }

    /// Parse a marker pair from hex text, e.g. `("02", "0d0a")`.
    pub fn from_hex(head: &str, tail: &str) -> Result<Self> {
        Self::new(parse_hex(head)?, parse_hex(tail)?)
    }

    /// The head marker.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// The tail marker.
    pub fn tail(&self) -> &[u8] {
        &self.tail
    }

    /// Advance a running match of the head marker by one byte.
    ///
    /// `matched` is the length of the head prefix that ends the bytes seen so
    /// far; the result is the same for the sequence extended by `byte`. On a
    /// mismatch this falls back through shorter prefixes, so a head that
    /// overlaps itself (e.g. `AAB` inside `AAAB`) is still found.
    pub fn advance_head(&self, mut matched: usize, byte: u8) -> usize {
        let head = self.head();
        if matched == head.len() {
            matched = self.head_prefix[matched - 1];
        }
        while matched > 0 && head[matched] != byte {
            matched = self.head_prefix[matched - 1];
        }
        if head[matched] == byte {
            matched + 1
        } else {
            0
        }
    }

    /// Wrap a payload in head and tail.
    pub fn wrap(&self, payload: &[u8]) -> Bytes {
        let mut out = Vec::with_capacity(self.head.len() + payload.len() + self.tail.len());
        out.extend_from_slice(&self.head);
        out.extend_from_slice(payload);
        out.extend_from_slice(&self.tail);
        out.into()
    }

    /// Strip head and tail from a complete frame.
    ///
    /// Returns `None` if the frame is not delimited by these markers.
    pub fn strip<'a>(&self, frame: &'a [u8]) -> Option<&'a [u8]> {
        if frame.len() < self.head.len() + self.tail.len() {
            return None;
        }
        frame
            .strip_prefix(self.head.as_ref())
            .and_then(|rest| rest.strip_suffix(self.tail.as_ref()))
    }
}

fn prefix_table(marker: &[u8]) -> Vec<usize> {
    let mut table = vec![0; marker.len()];
    let mut len = 0;
    for i in 1..marker.len() {
        while len > 0 && marker[i] != marker[len] {
            len = table[len - 1];
        }
        if marker[i] == marker[len] {
            len += 1;
        }
        table[i] = len;
    }
    table
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let cleaned: String = text
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | ':'))
        .collect();
    if cleaned.is_empty() || cleaned.len() % 2 != 0 || !cleaned.is_ascii() {
        return Err(FrameError::InvalidHex(text.to_string()));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| FrameError::InvalidHex(text.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_markers() {
        assert_eq!(
            Markers::new(Vec::new(), b"]".to_vec()),
            Err(FrameError::EmptyMarker { which: "head" })
        );
        assert_eq!(
            Markers::new(b"[".to_vec(), Vec::new()),
            Err(FrameError::EmptyMarker { which: "tail" })
        );
    }

    #[test]
    fn rejects_identical_markers() {
        assert_eq!(
            Markers::new(b"##".to_vec(), b"##".to_vec()),
            Err(FrameError::SameMarkers)
        );
    }

    #[test]
    fn parses_hex_markers() {
        let markers = Markers::from_hex("0x02", "0d-0a").unwrap();
        assert_eq!(markers.head(), &[0x02]);
        assert_eq!(markers.tail(), &[0x0d, 0x0a]);

        assert!(matches!(
            Markers::from_hex("2", "03"),
            Err(FrameError::InvalidHex(_))
        ));
        assert!(matches!(
            Markers::from_hex("zz", "03"),
            Err(FrameError::InvalidHex(_))
        ));
    }

    #[test]
    fn head_match_falls_back_on_self_overlap() {
        let markers = Markers::new(b"AAB".to_vec(), b"Z".to_vec()).unwrap();
        let mut matched = 0;
        let mut trace = Vec::new();
        for &byte in b"xAAAAB" {
            matched = markers.advance_head(matched, byte);
            trace.push(matched);
        }
        assert_eq!(trace, vec![0, 1, 2, 2, 2, 3]);

        let markers = Markers::new(b"ABAC".to_vec(), b"Z".to_vec()).unwrap();
        let mut matched = 0;
        for &byte in b"ABABAC" {
            matched = markers.advance_head(matched, byte);
        }
        assert_eq!(matched, 4);
        assert_eq!(prefix_table(b"ABAC"), vec![0, 0, 1, 0]);
        assert_eq!(prefix_table(b"AAB"), vec![0, 1, 0]);
    }

    #[test]
    fn wrap_and_strip() {
        let markers = Markers::new(b"<<".to_vec(), b">>".to_vec()).unwrap();
        let frame = markers.wrap(b"body");
        assert_eq!(frame.as_ref(), b"<<body>>");
        assert_eq!(markers.strip(&frame), Some(b"body".as_ref()));
        assert_eq!(markers.strip(b"<<body"), None);
        assert_eq!(markers.strip(b"<>"), None);
    }
}
