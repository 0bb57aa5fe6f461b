//! Hex rendering for log output.

use std::fmt::Write;

/// Default number of bytes rendered by [`hex_preview`] in log lines.
pub const DEFAULT_PREVIEW_LEN: usize = 100;

/// Render up to `max` bytes as space-separated hex, noting any remainder.
///
/// ```
/// use sockprims_frame::hex_preview;
/// assert_eq!(hex_preview(&[0x02, 0xab, 0x03], 8), "02 ab 03");
/// assert_eq!(hex_preview(&[1, 2, 3, 4], 2), "01 02 ..(+2)");
/// ```
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let shown = data.len().min(max);
    let mut out = String::with_capacity(shown * 3 + 8);
    for (i, byte) in data[..shown].iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02x}");
    }
    if data.len() > shown {
        let _ = write!(out, " ..(+{})", data.len() - shown);
    }
    out
}
