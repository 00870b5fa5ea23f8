//! Incremental framing of a byte stream into top-level JSON values.
//!
//! Peers write JSON values back to back with no length prefix, so a single
//! read can hold half a message, several messages, or the tail of one
//! message followed by more. The framer buffers bytes until a complete
//! top-level value is available and emits values in arrival order.
//!
//! Value boundaries come from a byte scanner that follows nesting depth and
//! string state, resuming where the previous chunk stopped. Only the span of
//! a closed top-level value is handed to serde_json. A span that fails to
//! parse is dropped whole, logged and counted, and framing resumes right
//! after it. Top-level values are objects or arrays; stray bytes between
//! values are discarded.

use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

/// Default cap on bytes buffered for one incomplete value (16 MiB)
pub const DEFAULT_MAX_BUFFERED: usize = 16 * 1024 * 1024;

/// Scanner position inside the value at the front of the buffer
#[derive(Debug, Clone, Copy, Default)]
struct ScanState {
    /// Bytes of the current value already scanned
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ScanState {
    /// Continue scanning `buf`, whose first byte opens the value. Returns the
    /// value's length once its outermost bracket closes.
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        while let Some(&byte) = buf.get(self.offset) {
            self.offset += 1;
            if self.in_string {
                match byte {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.offset);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Frame decoder usable with `FramedRead`/`FramedWrite`.
///
/// tokio-util owns the buffer; the codec keeps only the scan position of the
/// value being received. Use [`Framer`] when feeding chunks by hand.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_buffered: usize,
    dropped: u64,
    scan: ScanState,
    /// Set while the rest of an oversized value is skipped unbuffered
    discarding: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::with_max_buffered(DEFAULT_MAX_BUFFERED)
    }

    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            max_buffered,
            dropped: 0,
            scan: ScanState::default(),
            discarding: false,
        }
    }

    /// Number of malformed or oversized frames discarded so far
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Pop the next complete value off the front of `src`, if there is one.
    pub fn decode_value(&mut self, src: &mut BytesMut) -> Option<Value> {
        loop {
            if self.scan.offset == 0 && !self.discarding && !self.skip_to_value_start(src) {
                return None;
            }

            let Some(end) = self.scan.advance(src) else {
                if self.discarding {
                    src.clear();
                    self.scan.offset = 0;
                } else if src.len() > self.max_buffered {
                    warn!(
                        buffered = src.len(),
                        limit = self.max_buffered,
                        "Dropping oversized partial JSON frame"
                    );
                    self.dropped += 1;
                    self.discarding = true;
                    src.clear();
                    self.scan.offset = 0;
                }
                return None;
            };

            self.scan = ScanState::default();
            if self.discarding {
                trace!(bytes = end, "Skipped the tail of an oversized frame");
                self.discarding = false;
                src.advance(end);
                continue;
            }

            let frame = src.split_to(end);
            match serde_json::from_slice::<Value>(&frame) {
                Ok(value) => {
                    trace!(bytes = end, "Decoded JSON frame");
                    return Some(value);
                }
                Err(err) => {
                    warn!(error = %err, dropped_bytes = end, "Dropping malformed JSON frame");
                    self.dropped += 1;
                }
            }
        }
    }

    /// Drop whitespace and stray bytes in front of the next value. Returns
    /// whether `src` now starts with `{` or `[`.
    fn skip_to_value_start(&mut self, src: &mut BytesMut) -> bool {
        let whitespace = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        src.advance(whitespace);

        match src.iter().position(|b| *b == b'{' || *b == b'[') {
            Some(0) => true,
            Some(stray) => {
                warn!(dropped_bytes = stray, "Dropping bytes outside a JSON value");
                self.dropped += 1;
                src.advance(stray);
                true
            }
            None => {
                if !src.is_empty() {
                    warn!(dropped_bytes = src.len(), "Dropping bytes outside a JSON value");
                    self.discard(src);
                }
                false
            }
        }
    }

    fn discard(&mut self, src: &mut BytesMut) {
        self.dropped += 1;
        self.reset_scan();
        src.clear();
    }

    fn reset_scan(&mut self) {
        self.scan = ScanState::default();
        self.discarding = false;
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonCodec {
    type Item = Value;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, Self::Error> {
        Ok(self.decode_value(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>, Self::Error> {
        if let Some(value) = self.decode_value(src) {
            return Ok(Some(value));
        }
        if !src.is_empty() {
            debug!(bytes = src.len(), "Stream ended inside a JSON frame");
            self.discard(src);
        }
        Ok(None)
    }
}

/// Serialized messages are written as-is followed by a newline. The newline
/// is insignificant to the framer and keeps raw sessions readable in a
/// terminal.
impl Encoder<String> for JsonCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

/// Push-style framer owning its own buffer, one per connection.
#[derive(Debug, Default)]
pub struct Framer {
    buffer: BytesMut,
    codec: JsonCodec,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            codec: JsonCodec::with_max_buffered(max_buffered),
        }
    }

    /// Feed a chunk and invoke `on_value` once per completed value, in order.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_value: F)
    where
        F: FnMut(Value),
    {
        self.buffer.extend_from_slice(chunk);
        while let Some(value) = self.codec.decode_value(&mut self.buffer) {
            on_value(value);
        }
    }

    /// Feed a chunk and collect the completed values.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        let mut values = Vec::new();
        self.feed(chunk, |value| values.push(value));
        values
    }

    /// Bytes held for a value that has not completed yet
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.codec.dropped_frames()
    }

    /// Discard any partial value, e.g. on connection teardown.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "Discarding partial frame on reset");
        }
        self.buffer.clear();
        self.codec.reset_scan();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::JsonRpcRequest;
    use crate::types::RequestId;
    use serde_json::json;

    fn sample() -> String {
        serde_json::to_string(&JsonRpcRequest::new(
            RequestId::Number(42),
            "echo",
            json!(["hello", {"nested": [1, 2, {"deep": "}"}]}]),
        ))
        .unwrap()
    }

    #[test]
    fn test_single_value() {
        let mut framer = Framer::new();
        let values = framer.push(sample().as_bytes());
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["method"], "echo");
        assert_eq!(values[0]["id"], 42);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_split_at_every_offset() {
        let encoded = sample();
        let whole = Framer::new().push(encoded.as_bytes());

        for split in 0..=encoded.len() {
            let (head, tail) = encoded.as_bytes().split_at(split);
            let mut framer = Framer::new();
            let mut values = framer.push(head);
            values.extend(framer.push(tail));
            assert_eq!(values, whole, "split at {}", split);
        }
    }

    #[test]
    fn test_concatenated_values_with_previous_tail() {
        let encoded = sample();
        let (head, tail) = encoded.split_at(10);

        let mut framer = Framer::new();
        assert!(framer.push(head.as_bytes()).is_empty());

        let chunk = format!("{}{}\n{}", tail, encoded, encoded);
        let values = framer.push(chunk.as_bytes());
        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| v["id"] == 42));
    }

    #[test]
    fn test_empty_chunk() {
        let mut framer = Framer::new();
        assert!(framer.push(b"").is_empty());
        assert!(framer.push(b"  \r\n ").is_empty());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_malformed_value_does_not_desync() {
        let mut framer = Framer::new();
        let chunk = format!("{{\"method\": nope}}{}", sample());
        let values = framer.push(chunk.as_bytes());
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["id"], 42);
        assert_eq!(framer.dropped_frames(), 1);
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut framer = Framer::new();
        let values = framer.push(b"xyz{\"id\":1,\"result\":true}");
        assert_eq!(values, vec![json!({"id": 1, "result": true})]);
        assert_eq!(framer.dropped_frames(), 1);
    }

    #[test]
    fn test_malformed_value_on_later_line() {
        let mut framer = Framer::new();
        let values = framer.push(b"{\"id\":1,\"result\":1}\n{\"id\":,}\n{\"id\":2,\"result\":2}");
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["id"], 2);
    }

    #[test]
    fn test_oversized_partial_is_dropped() {
        let mut framer = Framer::with_max_buffered(16);
        assert!(framer.push(b"{\"padding\": \"aaaaaaaaaaaaaaaaaaaa").is_empty());
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.dropped_frames(), 1);

        // The tail of the dropped value is skipped, braces in it included
        assert!(framer.push(b"aaa{aaa").is_empty());
        assert_eq!(framer.buffered(), 0);

        let values = framer.push(b"aaa\"}{\"id\":1}");
        assert_eq!(values, vec![json!({"id": 1})]);
        assert_eq!(framer.dropped_frames(), 1);
    }

    #[test]
    fn test_brace_in_string_of_malformed_value() {
        let mut framer = Framer::new();
        let values = framer.push(b"{\"a\": nope, \"s\": \"{\"}{\"id\":2,\"result\":2}");
        assert_eq!(values, vec![json!({"id": 2, "result": 2})]);
        assert_eq!(framer.dropped_frames(), 1);
    }

    #[test]
    fn test_nested_object_of_malformed_value_is_not_emitted() {
        let mut framer = Framer::new();
        let values =
            framer.push(b"{\"a\": nope, \"inner\": {\"id\":1,\"result\":\"forged\"}}");
        assert!(values.is_empty());
        assert_eq!(framer.dropped_frames(), 1);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_escaped_quotes_and_brackets_in_strings() {
        let mut framer = Framer::new();
        let values = framer.push(br#"{"s":"a\"}]\\"}[1,"]"]"#);
        assert_eq!(values, vec![json!({"s": "a\"}]\\"}), json!([1, "]"])]);
        assert_eq!(framer.dropped_frames(), 0);
    }

    #[test]
    fn test_large_value_in_small_chunks() {
        let payload = "x".repeat(1 << 20);
        let encoded = json!({"id": 1, "result": payload}).to_string();

        let mut framer = Framer::new();
        let mut values = Vec::new();
        for chunk in encoded.as_bytes().chunks(4096) {
            values.extend(framer.push(chunk));
            if values.is_empty() {
                // Each chunk is scanned once, never the whole buffer again
                assert_eq!(framer.codec.scan.offset, framer.buffered());
            }
        }
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["result"].as_str().map(str::len), Some(1 << 20));
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut framer = Framer::new();
        framer.push(b"{\"id\":");
        assert!(framer.buffered() > 0);
        framer.reset();
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.push(b"{\"id\":3}").len(), 1);
    }

    #[test]
    fn test_codec_decode_eof_drops_partial() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1}{\"id\""[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(json!({"id": 1})));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
        assert_eq!(codec.dropped_frames(), 1);
    }

    #[test]
    fn test_codec_encodes_newline_delimited() {
        let mut codec = JsonCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("{\"id\":1}".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"id\":1}\n");
    }
}
