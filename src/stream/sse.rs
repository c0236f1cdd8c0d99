/// SSE (Server-Sent Events) record parser and byte-stream adapters.
///
/// Handles the low-level parsing of SSE records from a byte stream,
/// including buffering partial lines and partial UTF-8 sequences, per the
/// [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).
/// `id:` and `retry:` fields are accepted but not surfaced.
use super::SseEvent;
use crate::error::BridgeError;
use crate::protocol::backend::BackendEvent;
use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use smallvec::SmallVec;
use std::pin::Pin;

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn with_capacity(capacity: usize) -> Self {
        let mut events = SmallVec::new();
        events.reserve(capacity);
        Self { events, head: 0 }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        if parsed.is_empty() {
            return;
        }
        self.events.reserve(parsed.len());
        self.events.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// SseParser — incremental SSE line parser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary boundaries)
/// and it yields fully-assembled [`SseEvent`] records.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            has_data: false,
        }
    }

    /// Feed raw text and return any complete events parsed.
    ///
    /// - `event:` sets the event type for the next record
    /// - `data:` appends to the data buffer (one leading space stripped);
    ///   multiple `data:` lines are joined with `\n`
    /// - an empty line terminates a record; records without data are skipped
    /// - lines starting with `:` are comments
    /// - unknown fields are ignored
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Whether a partially received record is buffered.
    #[must_use]
    pub fn has_partial_record(&self) -> bool {
        self.has_data || self.event_type.is_some() || self.read_offset < self.buffer.len()
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                });
                *has_data = false;
            } else {
                *event_type = None;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// UTF-8 reassembly
// ---------------------------------------------------------------------------

/// Holds the tail of a byte chunk that ends inside a UTF-8 sequence until
/// the rest of the sequence arrives.
#[derive(Default)]
struct Utf8Reassembler {
    remainder: Vec<u8>,
}

impl Utf8Reassembler {
    fn feed(
        &mut self,
        bytes: &[u8],
        parser: &mut SseParser,
        out: &mut Vec<SseEvent>,
    ) -> Result<(), BridgeError> {
        if self.remainder.is_empty() {
            return self.feed_complete_prefix(bytes, parser, out);
        }
        let mut joined = std::mem::take(&mut self.remainder);
        joined.extend_from_slice(bytes);
        self.feed_complete_prefix(&joined, parser, out)
    }

    fn feed_complete_prefix(
        &mut self,
        bytes: &[u8],
        parser: &mut SseParser,
        out: &mut Vec<SseEvent>,
    ) -> Result<(), BridgeError> {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                parser.feed_into(text, out);
                Ok(())
            }
            // Incomplete trailing sequence: decode the prefix, keep the tail.
            Err(err) if err.error_len().is_none() => {
                let (complete, tail) = bytes.split_at(err.valid_up_to());
                let text = std::str::from_utf8(complete).map_err(invalid_utf8)?;
                parser.feed_into(text, out);
                self.remainder.extend_from_slice(tail);
                Ok(())
            }
            Err(err) => Err(invalid_utf8(err)),
        }
    }

    fn is_empty(&self) -> bool {
        self.remainder.is_empty()
    }
}

fn invalid_utf8(err: std::str::Utf8Error) -> BridgeError {
    BridgeError::StreamDecode(format!("backend stream is not valid UTF-8: {err}"))
}

// ---------------------------------------------------------------------------
// Stream adapters
// ---------------------------------------------------------------------------

type ByteSource<E> = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, E>> + Send>>;

struct SseStreamState<E> {
    source: Option<ByteSource<E>>,
    parser: SseParser,
    utf8: Utf8Reassembler,
    parsed: Vec<SseEvent>,
    pending: PendingEvents,
}

/// Split a byte stream into SSE records.
///
/// Yields each record as soon as its terminating blank line arrives, in
/// arrival order. A read error or invalid UTF-8 yields one `Err` item and
/// ends the stream; the byte source is dropped at that point. A trailing
/// partial record at end of input is discarded.
pub fn sse_event_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<SseEvent, BridgeError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseStreamState {
        source: Some(Box::pin(byte_stream) as ByteSource<E>),
        parser: SseParser::new(),
        utf8: Utf8Reassembler::default(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::with_capacity(8),
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }

            let source = state.source.as_mut()?;
            let next = source.as_mut().next().await;
            match next {
                Some(Ok(bytes)) => {
                    if let Err(err) = state.utf8.feed(&bytes, &mut state.parser, &mut state.parsed)
                    {
                        state.source = None;
                        return Some((Err(err), state));
                    }
                    state.pending.extend_from_vec(&mut state.parsed);
                }
                Some(Err(err)) => {
                    state.source = None;
                    let err = BridgeError::UpstreamTransport(format!(
                        "backend stream read failed: {err}"
                    ));
                    return Some((Err(err), state));
                }
                None => {
                    state.source = None;
                    if state.parser.has_partial_record() || !state.utf8.is_empty() {
                        tracing::debug!(
                            "backend stream ended inside a record; discarding partial data"
                        );
                    }
                    return None;
                }
            }
        }
    })
}

/// Split a byte stream into decoded [`BackendEvent`]s.
///
/// Recognized event types with malformed payloads surface as
/// [`BridgeError::StreamDecode`] items.
pub fn backend_event_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<BackendEvent, BridgeError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    sse_event_stream(byte_stream).map(|item| item.and_then(BackendEvent::from_sse))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::convert::Infallible;

    fn byte_source(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        futures_util::stream::iter(chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))))
    }

    async fn collect_events(chunks: Vec<Vec<u8>>) -> Vec<SseEvent> {
        sse_event_stream(byte_source(chunks))
            .map(|item| item.expect("event"))
            .collect()
            .await
    }

    // -- SseParser tests --

    #[test]
    fn test_parse_named_event() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: add\ndata: {\"id\":\"1\",\"text\":\"Hi\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("add"));
        assert_eq!(events[0].data, "{\"id\":\"1\",\"text\":\"Hi\"}");
    }

    #[test]
    fn test_parse_multiline_data() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: line1\ndata: line2\ndata: line3\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2\nline3");
    }

    #[test]
    fn test_parse_ignores_comments_and_unknown_fields() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keepalive\nid: 42\nretry: 1000\nfoo: bar\ndata: hello\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
        assert!(events[0].event.is_none());
    }

    #[test]
    fn test_parse_incremental_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("event: add\ndata: hel").is_empty());
        assert!(parser.has_partial_record());
        assert!(parser.feed("lo\n").is_empty());
        let events = parser.feed("\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("add"));
        assert_eq!(events[0].data, "hello");
        assert!(!parser.has_partial_record());
    }

    #[test]
    fn test_parse_crlf_line_endings() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: finish\r\ndata: {}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("finish"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn test_event_without_data_is_skipped_and_does_not_leak() {
        let mut parser = SseParser::new();
        let events = parser.feed("event: ping\n\ndata: plain\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].event.is_none());
        assert_eq!(events[0].data, "plain");
    }

    #[test]
    fn test_parse_data_no_space_after_colon() {
        let mut parser = SseParser::new();
        let events = parser.feed("data:nospace\n\n");
        assert_eq!(events[0].data, "nospace");
    }

    // -- Stream adapter tests --

    #[tokio::test]
    async fn test_every_split_point_yields_identical_events() {
        let wire = "event: add\ndata: {\"id\":\"m\",\"text\":\"caf\u{e9} \u{4e2d}\u{6587} \u{1f600}\"}\n\n\
                    : comment\n\
                    event: finish\r\ndata: {\"id\":\"m\",\"finish_reason\":\"stop\"}\r\n\r\n"
            .as_bytes()
            .to_vec();
        let expected = collect_events(vec![wire.clone()]).await;
        assert_eq!(expected.len(), 2);

        for split in 1..wire.len() {
            let chunks = vec![wire[..split].to_vec(), wire[split..].to_vec()];
            assert_eq!(collect_events(chunks).await, expected, "split at {split}");
        }

        let bytewise = wire.iter().map(|b| vec![*b]).collect();
        assert_eq!(collect_events(bytewise).await, expected);
    }

    #[tokio::test]
    async fn test_partial_record_at_eof_is_discarded() {
        let events = collect_events(vec![b"event: add\ndata: {\"text\":\"a\"}\n\nevent: add\ndata: {\"te".to_vec()])
            .await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_a_decode_error() {
        let items: Vec<_> = sse_event_stream(byte_source(vec![
            b"data: ok\n\n".to_vec(),
            vec![b'd', b'a', 0xff, b'\n'],
            b"data: never\n\n".to_vec(),
        ]))
        .collect()
        .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(BridgeError::StreamDecode(_))));
    }

    #[tokio::test]
    async fn test_read_error_ends_stream_with_transport_error() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: first\n\n")),
            Err("connection reset"),
            Ok(Bytes::from_static(b"data: second\n\n")),
        ]);
        let items: Vec<_> = sse_event_stream(source).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().map(|e| e.data.as_str()).ok(), Some("first"));
        assert!(matches!(items[1], Err(BridgeError::UpstreamTransport(_))));
    }

    #[tokio::test]
    async fn test_backend_event_stream_decodes_types() {
        let wire = b"event: add\ndata: {\"id\":\"m\",\"text\":\"Hel\"}\n\n\
event: status\ndata: thinking\n\n\
event: finish\ndata: {\"id\":\"m\",\"finish_reason\":\"stop\"}\n\n"
            .to_vec();
        let events: Vec<_> = backend_event_stream(byte_source(vec![wire]))
            .map(|item| item.expect("backend event"))
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], BackendEvent::Add(p) if p.text == "Hel"));
        assert!(matches!(&events[1], BackendEvent::Other { event_type } if event_type == "status"));
        assert!(matches!(&events[2], BackendEvent::Finish(p) if p.reason() == "stop"));
    }
}
