//! Line splitter for the modem's serial stream
//!
//! Splits on LF, strips CR and surrounding blanks, drops empty lines. The data
//! prompt `>` is never followed by a line terminator, so it is emitted as a
//! line of its own as soon as it is seen at a line start.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::warn;

use super::DATA_PROMPT;

/// Default longest line kept; longer lines are discarded up to the next LF
pub const DEFAULT_MAX_LINE_LEN: usize = 1024;

#[derive(Debug)]
pub struct AtLineCodec {
    max_line_len: usize,
    discarding: bool,
}

impl AtLineCodec {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            max_line_len,
            discarding: false,
        }
    }
}

impl Default for AtLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn to_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

impl Decoder for AtLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            if !self.discarding {
                let blanks = buf
                    .iter()
                    .take_while(|b| matches!(**b, b'\r' | b'\n'))
                    .count();
                buf.advance(blanks);
            }
            if buf.is_empty() {
                return Ok(None);
            }

            if !self.discarding && buf[0] == b'>' {
                let n = if buf.len() >= 2 && buf[1] == b' ' { 2 } else { 1 };
                buf.advance(n);
                return Ok(Some(DATA_PROMPT.to_string()));
            }

            match buf.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let raw = buf.split_to(pos + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if let Some(line) = to_line(&raw) {
                        return Ok(Some(line));
                    }
                },
                None => {
                    if buf.len() > self.max_line_len {
                        warn!(
                            "AT line exceeds {} bytes, discarding",
                            self.max_line_len
                        );
                        self.discarding = true;
                        buf.clear();
                    }
                    return Ok(None);
                },
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        let rest = buf.split();
        Ok(to_line(&rest))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn drain(codec: &mut AtLineCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = codec.decode(buf).unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_splits_crlf_lines() {
        let mut codec = AtLineCodec::new();
        let mut buf = BytesMut::from(&b"\r\n+QMTCONN: 0,3\r\n\r\nOK\r\n"[..]);
        assert_eq!(drain(&mut codec, &mut buf), vec!["+QMTCONN: 0,3", "OK"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_waits() {
        let mut codec = AtLineCodec::new();
        let mut buf = BytesMut::from(&b"\r\nO"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"K\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("OK"));
    }

    #[test]
    fn test_prompt_without_terminator() {
        let mut codec = AtLineCodec::new();
        let mut buf = BytesMut::from(&b"\r\n> "[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(">"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_overlong_line_discarded() {
        let mut codec = AtLineCodec::with_max_line_len(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"tail\r\nOK\r\n");
        assert_eq!(drain(&mut codec, &mut buf), vec!["OK"]);
    }

    #[test]
    fn test_eof_flushes_unterminated_line() {
        let mut codec = AtLineCodec::new();
        let mut buf = BytesMut::from(&b"RDY"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().as_deref(), Some("RDY"));
    }
}
