//! Byte-bounded output accumulation

use crate::constants::TRUNCATION_MARKER;

/// Accumulates process output up to a byte cap.
///
/// Once the cap is reached further input is discarded; the rendered string
/// then carries a trailing marker line. Chunks are split on the cap boundary,
/// so the kept prefix never exceeds the limit.
#[derive(Debug)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append a chunk, keeping only what fits under the cap.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.truncated {
            return;
        }
        let remaining = self.limit.saturating_sub(self.buf.len());
        if chunk.len() <= remaining {
            self.buf.extend_from_slice(chunk);
        } else {
            self.buf.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Render as UTF-8 (lossy), appending the truncation marker if needed.
    pub fn into_string(self) -> String {
        let mut out = String::from_utf8_lossy(&self.buf).into_owned();
        if self.truncated {
            out.push_str(TRUNCATION_MARKER);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_limit_passes_through() {
        let mut buf = OutputBuffer::new(16);
        buf.push(b"hello");
        buf.push(b" world");
        assert!(!buf.truncated());
        assert_eq!(buf.into_string(), "hello world");
    }

    #[test]
    fn test_over_limit_truncates_with_marker() {
        let mut buf = OutputBuffer::new(8);
        buf.push(b"0123456789");
        assert!(buf.truncated());
        let out = buf.into_string();
        assert_eq!(out, format!("01234567{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_exact_limit_is_not_truncated() {
        let mut buf = OutputBuffer::new(4);
        buf.push(b"abcd");
        assert!(!buf.truncated());
        assert_eq!(buf.into_string(), "abcd");
    }

    #[test]
    fn test_discards_after_overflow() {
        let mut buf = OutputBuffer::new(4);
        buf.push(b"abcdef");
        buf.push(b"ghij");
        let out = buf.into_string();
        assert!(out.starts_with("abcd"));
        assert!(!out.contains("ghij"));
    }
}
