//! Stateful line codec for compiler stdout.
//!
//! Bytes are buffered until a `\n` arrives, so a line split across any number
//! of reads is classified exactly once, as if it had arrived whole.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::parser::parse_line;
use super::types::OutputEvent;

/// Default upper bound for a single stdout line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Errors produced while framing stdout.
#[derive(Debug, thiserror::Error)]
pub enum OutputCodecError {
    #[error("stdout line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("failed to read stdout: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoder turning raw stdout bytes into [`OutputEvent`]s.
#[derive(Debug, Clone)]
pub struct OutputCodec {
    max_line_bytes: usize,
    /// Offset already scanned for a newline in the current buffer.
    next_index: usize,
}

impl Default for OutputCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputCodec {
    pub const fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub const fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
        }
    }

    pub const fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    /// The limit applies to the line content, excluding `\r\n` or `\n`.
    fn classify(&self, raw: &[u8]) -> Result<Option<OutputEvent>, OutputCodecError> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.len() > self.max_line_bytes {
            return Err(OutputCodecError::LineTooLong {
                limit: self.max_line_bytes,
            });
        }
        Ok(parse_line(&String::from_utf8_lossy(raw)))
    }
}

impl Decoder for OutputCodec {
    type Item = OutputEvent;
    type Error = OutputCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<OutputEvent>, OutputCodecError> {
        loop {
            let start = self.next_index.min(buf.len());
            let Some(offset) = buf[start..].iter().position(|b| *b == b'\n') else {
                // Leave room for a `\r` that may precede the coming `\n`.
                if buf.len() > self.max_line_bytes.saturating_add(1) {
                    return Err(OutputCodecError::LineTooLong {
                        limit: self.max_line_bytes,
                    });
                }
                self.next_index = buf.len();
                return Ok(None);
            };

            let newline = start + offset;
            self.next_index = 0;
            let line = buf.split_to(newline + 1);
            if let Some(event) = self.classify(&line[..newline])? {
                return Ok(Some(event));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<OutputEvent>, OutputCodecError> {
        if let Some(event) = self.decode(buf)? {
            return Ok(Some(event));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        // Final line without a terminator.
        self.next_index = 0;
        let line = buf.split_to(buf.len());
        self.classify(&line)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    const TRANSCRIPT: &str = concat!(
        "{\"type\":\"output\",\"message\":\"1\"}\n",
        "\n",
        "plain text line\r\n",
        "{\"type\":\"input\",\"prompt\":\"x?\"}\n",
        "{\"type\":\"output\",\"message\":\"caf\u{e9} \u{2713}\"}\n",
        "{\"type\":\"unknown\"}\n",
        "trailing without newline",
    );

    /// Feed `chunks` one at a time, the way `FramedRead` would.
    fn decode_chunks(chunks: &[&[u8]]) -> Vec<OutputEvent> {
        let mut codec = OutputCodec::new();
        let mut buf = BytesMut::new();
        let mut events = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            while let Some(event) = codec.decode(&mut buf).unwrap() {
                events.push(event);
            }
        }
        while let Some(event) = codec.decode_eof(&mut buf).unwrap() {
            events.push(event);
        }
        events
    }

    fn expected() -> Vec<OutputEvent> {
        vec![
            OutputEvent::output("1"),
            OutputEvent::output("plain text line"),
            OutputEvent::input_request("x?"),
            OutputEvent::output("caf\u{e9} \u{2713}"),
            OutputEvent::output("{\"type\":\"unknown\"}"),
            OutputEvent::output("trailing without newline"),
        ]
    }

    #[test]
    fn whole_transcript_in_one_chunk() {
        assert_eq!(decode_chunks(&[TRANSCRIPT.as_bytes()]), expected());
    }

    #[test]
    fn every_two_way_split_matches_single_chunk() {
        let bytes = TRANSCRIPT.as_bytes();
        for at in 0..=bytes.len() {
            let (a, b) = bytes.split_at(at);
            assert_eq!(decode_chunks(&[a, b]), expected(), "split at byte {at}");
        }
    }

    #[test]
    fn fixed_size_chunking_matches_single_chunk() {
        let bytes = TRANSCRIPT.as_bytes();
        for size in 1..=17 {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(decode_chunks(&chunks), expected(), "chunk size {size}");
        }
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut codec = OutputCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"output\","[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\"message\":\"joined\"}\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(OutputEvent::output("joined"))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn blank_input_produces_nothing() {
        assert!(decode_chunks(&[b"\n\n  \n\r\n"]).is_empty());
    }

    #[test]
    fn overlong_line_is_rejected() {
        let mut codec = OutputCodec::with_max_line_bytes(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, OutputCodecError::LineTooLong { limit: 8 }));
    }

    #[test]
    fn line_at_limit_is_accepted() {
        let mut codec = OutputCodec::with_max_line_bytes(8);
        let mut buf = BytesMut::from(&b"01234567\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(OutputEvent::output("01234567"))
        );
    }

    #[test]
    fn crlf_line_at_limit_is_accepted() {
        let bytes = b"01234567\r\n";
        for at in 0..bytes.len() {
            let mut codec = OutputCodec::with_max_line_bytes(8);
            let mut buf = BytesMut::from(&bytes[..at]);
            assert!(codec.decode(&mut buf).unwrap().is_none(), "split at byte {at}");
            buf.extend_from_slice(&bytes[at..]);
            assert_eq!(
                codec.decode(&mut buf).unwrap(),
                Some(OutputEvent::output("01234567")),
                "split at byte {at}"
            );
        }
    }

    #[test]
    fn unterminated_line_over_limit_is_rejected_at_eof() {
        let mut codec = OutputCodec::with_max_line_bytes(8);
        let mut buf = BytesMut::from(&b"012345678"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, OutputCodecError::LineTooLong { limit: 8 }));
    }

    #[tokio::test]
    async fn framed_read_over_async_reader() {
        let reader: &[u8] = TRANSCRIPT.as_bytes();
        let events: Vec<OutputEvent> = FramedRead::new(reader, OutputCodec::new())
            .map(|item| item.expect("decode"))
            .collect()
            .await;
        assert_eq!(events, expected());
    }
}
