//! Server-Sent Events (SSE) stream decoding.
//!
//! The response body arrives as arbitrary byte chunks. [`StreamDecoder`]
//! buffers them, hands out complete lines only, and turns `data:` lines into
//! [`StreamEvent`]s. [`decode_stream`] wraps that state machine around a
//! response body and exposes it as a lazy [`EventStream`].
//!
//! SSE format:
//! ```text
//! event: message_start
//! data: {"type": "message_start", ...}
//!
//! data: {"type": "content_block_delta", ...}
//!
//! data: [DONE]
//! ```

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{classify_transport_error, ClassifiedError};
use crate::http::TransportError;
use crate::stream::{EventStream, StreamEvent};
use crate::telemetry::TelemetrySink;

/// What a single line turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(StreamEvent),
    /// Not a data line (blank, comment, `event:` and so on).
    Skipped,
    /// A data line whose payload could not be decoded.
    Malformed(String),
    /// The end-of-stream marker.
    Done,
}

/// Incremental line buffer and event decoder for one streaming response.
///
/// Bytes are kept undecoded until a full line is present, so a chunk
/// boundary in the middle of a line (or of a UTF-8 sequence) changes nothing.
/// Once the end marker has been seen the decoder is terminal and yields
/// nothing more.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    cursor: usize,
    /// Everything before this offset is known to hold no line terminator.
    scanned: usize,
    done: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Append a chunk of body bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.done {
            return;
        }
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.scanned -= self.cursor;
            self.cursor = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete line, without its terminator. Accepts `\n` and `\r\n`.
    ///
    /// A line that is not valid UTF-8 comes back as `Err` with the bytes
    /// replaced lossily, for reporting.
    pub fn next_line(&mut self) -> Option<Result<String, String>> {
        if self.done {
            return None;
        }
        let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buffer.len();
            return None;
        };
        let end = self.scanned + offset;
        let line = &self.buffer[self.cursor..end];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let line = match std::str::from_utf8(line) {
            Ok(line) => Ok(line.to_string()),
            Err(_) => Err(String::from_utf8_lossy(line).into_owned()),
        };
        self.cursor = end + 1;
        self.scanned = self.cursor;
        Some(line)
    }

    /// Decode one complete line.
    pub fn decode_line(&mut self, line: &str) -> Decoded {
        if self.done {
            return Decoded::Done;
        }
        let Some(data) = parse_sse_line(line) else {
            return Decoded::Skipped;
        };
        if is_done_marker(data) {
            self.done = true;
            self.buffer.clear();
            self.cursor = 0;
            self.scanned = 0;
            return Decoded::Done;
        }
        serde_json::from_str(data)
            .ok()
            .and_then(StreamEvent::from_value)
            .map_or_else(|| Decoded::Malformed(data.to_string()), Decoded::Event)
    }

    /// Pull and decode the next complete line, if there is one.
    pub fn next_decoded(&mut self) -> Option<Decoded> {
        match self.next_line()? {
            Ok(line) => Some(self.decode_line(&line)),
            Err(lossy) => Some(match parse_sse_line(&lossy) {
                Some(data) => Decoded::Malformed(data.to_string()),
                None => Decoded::Skipped,
            }),
        }
    }

    /// Feed a chunk and collect every event it completes. Malformed lines
    /// are logged and skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.feed(chunk);
        let mut events = Vec::new();
        while let Some(decoded) = self.next_decoded() {
            match decoded {
                Decoded::Event(event) => events.push(event),
                Decoded::Malformed(raw) => {
                    tracing::warn!(raw = %raw, "skipped undecodable stream event");
                }
                Decoded::Skipped => {}
                Decoded::Done => break,
            }
        }
        events
    }

    /// Discard whatever is buffered at end of body. Returns the unterminated
    /// fragment, which is never decoded.
    pub fn finish(&mut self) -> Option<String> {
        let rest = &self.buffer[self.cursor..];
        let fragment = (!rest.is_empty()).then(|| String::from_utf8_lossy(rest).into_owned());
        self.buffer.clear();
        self.cursor = 0;
        self.scanned = 0;
        fragment
    }
}

/// Parse an SSE line to extract the data portion.
///
/// SSE lines are in the format: `data: <content>`
///
/// # Example
/// ```
/// use anthropic_transport::sse::parse_sse_line;
///
/// let line = "data: {\"key\": \"value\"}";
/// assert_eq!(parse_sse_line(line), Some("{\"key\": \"value\"}"));
///
/// let line = "event: ping";
/// assert_eq!(parse_sse_line(line), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").map(|s| s.trim())
}

/// Check if an SSE data line indicates the stream is done.
///
/// # Example
/// ```
/// use anthropic_transport::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}

struct DecodeState {
    body: BoxStream<'static, Result<Bytes, TransportError>>,
    decoder: StreamDecoder,
    cancel: CancellationToken,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    body_ended: bool,
    finished: bool,
}

impl DecodeState {
    fn report_malformed(&self, raw: &str) {
        match &self.telemetry {
            Some(sink) => sink.record_stream_parse_failure(raw),
            None => tracing::warn!(raw, "skipped undecodable stream event"),
        }
    }
}

/// Turn a response body into a lazy stream of events.
///
/// The stream yields events until the end marker or the end of the body.
/// A body read failure or a cancellation ends it with a single `Err`.
/// Dropping the stream drops the body.
pub fn decode_stream(
    body: BoxStream<'static, Result<Bytes, TransportError>>,
    cancel: CancellationToken,
    telemetry: Option<Arc<dyn TelemetrySink>>,
) -> EventStream {
    let state = DecodeState {
        body,
        decoder: StreamDecoder::new(),
        cancel,
        telemetry,
        body_ended: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if state.cancel.is_cancelled() {
                state.finished = true;
                return Some((Err(ClassifiedError::cancelled()), state));
            }

            // Process complete lines from buffer
            if let Some(decoded) = state.decoder.next_decoded() {
                match decoded {
                    Decoded::Event(event) => return Some((Ok(event), state)),
                    Decoded::Skipped => continue,
                    Decoded::Malformed(raw) => {
                        state.report_malformed(&raw);
                        continue;
                    }
                    Decoded::Done => {
                        tracing::debug!("end of stream marker received");
                        state.finished = true;
                        return None;
                    }
                }
            }

            if state.body_ended {
                if let Some(fragment) = state.decoder.finish() {
                    tracing::debug!(
                        bytes = fragment.len(),
                        "dropping unterminated line at end of stream"
                    );
                }
                state.finished = true;
                return None;
            }

            // No complete lines yet, read more
            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => None,
                chunk = state.body.next() => Some(chunk),
            };

            match next {
                None => {
                    state.finished = true;
                    return Some((Err(ClassifiedError::cancelled()), state));
                }
                Some(Some(Ok(chunk))) => state.decoder.feed(&chunk),
                Some(Some(Err(e))) => {
                    tracing::warn!(error = %e, "stream interrupted");
                    state.finished = true;
                    return Some((Err(classify_transport_error(&e)), state));
                }
                Some(None) => state.body_ended = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::telemetry::testing::RecordingSink;
    use futures::StreamExt;

    const TRANSCRIPT: &str = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n",
        "\n",
        ": keep-alive\n",
        "event: content_block_delta\r\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Héllo ✓\"}}\r\n",
        "\r\n",
        "data: {\"type\":\"ping\"}\n",
        "data: {\"type\":\"message_stop\"}\n",
        "data: [DONE]\n",
    );

    fn body_from(chunks: Vec<Vec<u8>>) -> BoxStream<'static, Result<Bytes, TransportError>> {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c)))).boxed()
    }

    fn decode_all(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = StreamDecoder::new();
        chunks.iter().flat_map(|c| decoder.push(c)).collect()
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: hello"), Some("hello"));
        assert_eq!(parse_sse_line("data:   spaces  "), Some("spaces"));
        assert_eq!(parse_sse_line("invalid"), None);
        assert_eq!(parse_sse_line(""), None);
    }

    #[test]
    fn test_is_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(!is_done_marker(""));
        assert!(!is_done_marker("{\"key\": \"value\"}"));
    }

    #[test]
    fn test_whole_transcript() {
        let events = decode_all(&[TRANSCRIPT.as_bytes()]);
        let types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            ["message_start", "content_block_delta", "ping", "message_stop"]
        );
        assert_eq!(events[1].text_delta(), Some("Héllo ✓"));
    }

    #[test]
    fn test_split_at_every_offset_matches_contiguous() {
        let bytes = TRANSCRIPT.as_bytes();
        let expected = decode_all(&[bytes]);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), expected, "split at {split}");
        }

        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&singles), expected);

        for size in [2, 3, 7, 13, 64] {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(decode_all(&chunks), expected, "chunk size {size}");
        }
    }

    #[test]
    fn test_partial_line_is_held_back() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"pi").is_empty());
        assert!(decoder.push(b"ng\"}").is_empty());
        let events = decoder.push(b"\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "ping");
    }

    #[test]
    fn test_done_ends_decoding() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(
            b"data: {\"type\":\"ping\"}\ndata: [DONE]\ndata: {\"type\":\"message_stop\"}\n",
        );
        assert_eq!(events.len(), 1);
        assert!(decoder.is_done());
        assert!(decoder.push(b"data: {\"type\":\"ping\"}\n").is_empty());
        assert_eq!(decoder.next_line(), None);
    }

    #[test]
    fn test_invalid_utf8_data_line_is_malformed() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(b"data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"a\xff\xfeb\"}}\n");
        assert!(matches!(decoder.next_decoded(), Some(Decoded::Malformed(_))));

        decoder.feed(b": \xff comment\ndata: {\"type\":\"ping\"}\n");
        assert_eq!(decoder.next_decoded(), Some(Decoded::Skipped));
        assert!(matches!(decoder.next_decoded(), Some(Decoded::Event(_))));
        assert_eq!(decoder.next_decoded(), None);
    }

    #[test]
    fn test_long_line_is_scanned_once() {
        let mut decoder = StreamDecoder::new();
        let payload = format!("data: {{\"type\":\"ping\",\"pad\":\"{}\"}}", "x".repeat(4096));
        for byte in payload.as_bytes() {
            decoder.feed(std::slice::from_ref(byte));
            assert_eq!(decoder.next_line(), None);
            assert_eq!(decoder.scanned, decoder.buffer.len());
        }
        decoder.feed(b"\n");
        assert_eq!(decoder.next_line(), Some(Ok(payload)));
        assert_eq!(decoder.scanned, decoder.cursor);
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(
            decoder.decode_line("data: {not json"),
            Decoded::Malformed("{not json".to_string())
        );
        assert_eq!(
            decoder.decode_line("data: {\"no_type\":1}"),
            Decoded::Malformed("{\"no_type\":1}".to_string())
        );
        assert_eq!(decoder.decode_line("event: ping"), Decoded::Skipped);
        assert_eq!(decoder.decode_line(""), Decoded::Skipped);

        let events =
            decoder.push(b"data: {broken\ndata: {\"type\":\"message_stop\"}\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "message_stop");
    }

    #[test]
    fn test_finish_returns_fragment() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"ping\"}").is_empty());
        assert_eq!(
            decoder.finish().as_deref(),
            Some("data: {\"type\":\"ping\"}")
        );
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn test_decode_stream_yields_events_then_ends() {
        let chunks = TRANSCRIPT
            .as_bytes()
            .chunks(5)
            .map(|c| c.to_vec())
            .collect();
        let events: Vec<_> = decode_stream(body_from(chunks), CancellationToken::new(), None)
            .collect()
            .await;
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.is_ok()));
    }

    #[tokio::test]
    async fn test_decode_stream_stops_at_done_even_with_more_data() {
        let body = body_from(vec![
            b"data: {\"type\":\"ping\"}\ndata: [DONE]\n".to_vec(),
            b"data: {\"type\":\"message_stop\"}\n".to_vec(),
        ]);
        let events: Vec<_> = decode_stream(body, CancellationToken::new(), None)
            .collect()
            .await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_stream_drops_unterminated_tail() {
        let body = body_from(vec![
            b"data: {\"type\":\"ping\"}\n".to_vec(),
            b"data: {\"type\":\"message_stop\"}".to_vec(),
        ]);
        let events: Vec<_> = decode_stream(body, CancellationToken::new(), None)
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().event_type(), "ping");
    }

    #[tokio::test]
    async fn test_decode_stream_reports_malformed_lines() {
        let sink = Arc::new(RecordingSink::default());
        let body = body_from(vec![
            b"data: {oops\ndata: {\"type\":\"message_stop\"}\n".to_vec(),
        ]);
        let telemetry: Arc<dyn TelemetrySink> = sink.clone();
        let events: Vec<_> = decode_stream(body, CancellationToken::new(), Some(telemetry))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(*sink.parse_failures.lock().unwrap(), vec!["{oops".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_stream_ends_with_transport_error() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"type\":\"ping\"}\n")),
            Err(TransportError::Body("connection reset".into())),
            Ok(Bytes::from_static(b"data: {\"type\":\"message_stop\"}\n")),
        ])
        .boxed();
        let events: Vec<_> = decode_stream(body, CancellationToken::new(), None)
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert_eq!(
            events[1].as_ref().unwrap_err().kind(),
            ErrorKind::NetworkFailure
        );
    }

    #[tokio::test]
    async fn test_cancel_before_next_line() {
        let cancel = CancellationToken::new();
        let body = body_from(vec![
            b"data: {\"type\":\"ping\"}\ndata: {\"type\":\"ping\"}\n".to_vec(),
        ]);
        let mut events = decode_stream(body, cancel.clone(), None);

        assert!(events.next().await.unwrap().is_ok());
        cancel.cancel();
        let err = events.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_data() {
        let cancel = CancellationToken::new();
        let body = stream::pending::<Result<Bytes, TransportError>>().boxed();
        let mut events = decode_stream(body, cancel.clone(), None);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = events.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(events.next().await.is_none());
    }
}
