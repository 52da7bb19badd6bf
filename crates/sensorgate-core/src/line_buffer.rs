//! Reassembly of newline-delimited records from notification chunks.
//!
//! BLE notifications arrive in small chunks (typically up to 20 bytes) with
//! no relation to record boundaries. [`LineBuffer`] accumulates them and
//! yields complete lines in arrival order.

use bytes::{Buf, BytesMut};

/// Accumulates byte chunks and emits complete `\n`-terminated lines.
///
/// Emitted lines have surrounding whitespace (including `\r`) stripped.
/// Lines that are empty after stripping are discarded. Invalid UTF-8 is
/// dropped silently.
///
/// # Example
///
/// ```
/// use sensorgate_core::LineBuffer;
///
/// let mut buf = LineBuffer::new();
/// assert!(buf.push(b"{\"gas\":1").is_empty());
/// assert_eq!(buf.push(b"}\r\n\r\nnext"), vec!["{\"gas\":1}".to_string()]);
/// assert_eq!(buf.pending(), 4);
/// ```
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(nl) = self.buf.iter().position(|&b| b == b'\n') {
            let raw = self.buf.split_to(nl);
            self.buf.advance(1);
            let text = decode_lossless(&raw);
            let line = text.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Number of buffered bytes not yet terminated by a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discard any partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Decode UTF-8, skipping invalid sequences instead of replacing them.
fn decode_lossless(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(raw).replace('\u{FFFD}', ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_chunk_multiple_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"a=1\nb=2\r\n  \nc=3\n");
        assert_eq!(lines, vec!["a=1", "b=2", "c=3"]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_partial_line_is_kept() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"temp\":").is_empty());
        assert!(buf.push(b"21.5").is_empty());
        assert_eq!(buf.push(b"}\n"), vec!["{\"temp\":21.5}"]);
    }

    #[test]
    fn test_invalid_utf8_is_dropped() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"ok\xff\xfe\n");
        assert_eq!(lines, vec!["ok"]);
    }

    #[test]
    fn test_clear_discards_partial() {
        let mut buf = LineBuffer::new();
        buf.push(b"partial");
        buf.clear();
        assert_eq!(buf.push(b"x\n"), vec!["x"]);
    }

    fn line_strategy() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9=,.:{}\" ]{0,24}"
    }

    proptest! {
        #[test]
        fn lines_independent_of_chunking(
            lines in prop::collection::vec(line_strategy(), 0..12),
            cuts in prop::collection::vec(1usize..32, 0..40),
        ) {
            let mut stream = Vec::new();
            for line in &lines {
                stream.extend_from_slice(line.as_bytes());
                stream.extend_from_slice(b"\r\n");
            }

            let expected: Vec<String> = lines
                .iter()
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();

            let mut whole = LineBuffer::new();
            prop_assert_eq!(whole.push(&stream), expected.clone());

            let mut chunked = LineBuffer::new();
            let mut out = Vec::new();
            let mut rest: &[u8] = &stream;
            let mut cuts = cuts.into_iter();
            while !rest.is_empty() {
                let n = cuts.next().unwrap_or(rest.len()).min(rest.len());
                let (head, tail) = rest.split_at(n);
                out.extend(chunked.push(head));
                rest = tail;
            }
            prop_assert_eq!(out, expected);
            prop_assert_eq!(chunked.pending(), 0);
        }
    }
}
