//! Incremental server-sent-events parser.
//!
//! Network reads deliver arbitrary byte slices, so frames (and multi-byte
//! UTF-8 sequences) can split anywhere. The parser buffers raw bytes and
//! only decodes once a complete `\n\n`-terminated frame is present,
//! joining multiple `data:` lines per the SSE spec.

/// Accumulates bytes and yields the payload of each complete event.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk of bytes from the wire.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Pop the next complete event's joined `data:` payload, if one has
    /// fully arrived. Events with no data lines (comments, keep-alives)
    /// are skipped.
    pub fn next_event(&mut self) -> Option<String> {
        loop {
            let (end, skip) = self.find_frame_end()?;
            let frame: Vec<u8> = self.buffer.drain(..end + skip).take(end).collect();

            let data = parse_frame(&frame);
            if !data.is_empty() {
                return Some(data);
            }
        }
    }

    /// Locate the earliest blank line terminating a frame. Returns the
    /// frame length and the separator length.
    fn find_frame_end(&self) -> Option<(usize, usize)> {
        let lf = find_subsequence(&self.buffer, b"\n\n");
        let crlf = find_subsequence(&self.buffer, b"\r\n\r\n");
        match (lf, crlf) {
            (Some(a), Some(b)) if b < a => Some((b, 4)),
            (Some(a), _) => Some((a, 2)),
            (None, Some(b)) => Some((b, 4)),
            (None, None) => None,
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_frame(frame: &[u8]) -> String {
    let text = String::from_utf8_lossy(frame);
    let mut data_lines = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).trim_end_matches('\r'));
        }
    }
    data_lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        parser.push(b"data: {\"token\": \"hi\"}\n\n");
        assert_eq!(parser.next_event().unwrap(), "{\"token\": \"hi\"}");
        assert!(parser.next_event().is_none());
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        parser.push(b"data: one\n\ndata: two\n\ndata: [DONE]\n\n");
        assert_eq!(parser.next_event().unwrap(), "one");
        assert_eq!(parser.next_event().unwrap(), "two");
        assert_eq!(parser.next_event().unwrap(), "[DONE]");
        assert!(parser.next_event().is_none());
    }

    #[test]
    fn test_event_split_across_arbitrary_boundaries() {
        let wire = b"data: {\"token\": \"hello\"}\n\ndata: {\"token\": \" world\"}\n\n";
        // Feed one byte at a time; every split point must reassemble.
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for byte in wire.iter() {
            parser.push(std::slice::from_ref(byte));
            while let Some(event) = parser.next_event() {
                events.push(event);
            }
        }
        assert_eq!(events, vec!["{\"token\": \"hello\"}", "{\"token\": \" world\"}"]);
    }

    #[test]
    fn test_multibyte_utf8_split_mid_character() {
        let payload = "data: caf\u{e9} \u{1f600}\n\n".as_bytes();
        let mid = payload.len() - 4; // inside the emoji's bytes
        let mut parser = SseParser::new();
        parser.push(&payload[..mid]);
        assert!(parser.next_event().is_none());
        parser.push(&payload[mid..]);
        assert_eq!(parser.next_event().unwrap(), "caf\u{e9} \u{1f600}");
    }

    #[test]
    fn test_crlf_separators() {
        let mut parser = SseParser::new();
        parser.push(b"data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(parser.next_event().unwrap(), "one");
        assert_eq!(parser.next_event().unwrap(), "two");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut parser = SseParser::new();
        parser.push(b"data: first\ndata: second\n\n");
        assert_eq!(parser.next_event().unwrap(), "first\nsecond");
    }

    #[test]
    fn test_comment_frames_skipped() {
        let mut parser = SseParser::new();
        parser.push(b": keep-alive\n\ndata: payload\n\n");
        assert_eq!(parser.next_event().unwrap(), "payload");
    }

    #[test]
    fn test_partial_frame_retained() {
        let mut parser = SseParser::new();
        parser.push(b"data: one\n\ndata: tw");
        assert_eq!(parser.next_event().unwrap(), "one");
        assert!(parser.next_event().is_none());
        parser.push(b"o\n\n");
        assert_eq!(parser.next_event().unwrap(), "two");
    }
}
