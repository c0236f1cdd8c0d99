use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use std::time::Instant;

use crate::config::ChunkFraming;
use crate::error::BridgeError;
use crate::observability::log_stream_complete;
use crate::protocol::backend::BackendEvent;
use crate::protocol::openai_chat::stream::{encode_chunk_into, ChunkHeader, ChunkPayload};
use crate::util::unix_now_secs;

use super::sse::backend_event_stream;

/// Outgoing chunk bytes, one item per backend event that produced output.
pub type ChunkStream = BoxStream<'static, Result<Bytes, BridgeError>>;

type EventStream = BoxStream<'static, Result<BackendEvent, BridgeError>>;

#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    /// Model name echoed in every chunk.
    pub model: String,
    /// Chunk id used when a backend event carries none.
    pub fallback_id: String,
    pub framing: ChunkFraming,
}

/// Outcome of feeding one backend event to the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStep {
    /// An incremental chunk was written.
    Delta,
    /// The terminal chunk was written; nothing follows it.
    Finished,
    /// The event produced no output.
    Skipped,
}

/// Converts backend `add`/`finish` events into `OpenAI` chat-completion chunks.
pub struct StreamTranscoder {
    options: TranscodeOptions,
    chunks: usize,
    text_bytes: usize,
    finished: bool,
}

impl StreamTranscoder {
    #[must_use]
    pub fn new(options: TranscodeOptions) -> Self {
        Self {
            options,
            chunks: 0,
            text_bytes: 0,
            finished: false,
        }
    }

    /// Encode one backend event into `out`.
    ///
    /// Events after `finish` are skipped.
    pub fn encode_event(&mut self, event: &BackendEvent, out: &mut String) -> TranscodeStep {
        if self.finished {
            return TranscodeStep::Skipped;
        }
        match event {
            BackendEvent::Add(payload) => {
                let header = self.header(payload.id.as_deref());
                encode_chunk_into(
                    out,
                    header,
                    ChunkPayload::Delta(&payload.text),
                    self.options.framing,
                );
                self.chunks += 1;
                self.text_bytes += payload.text.len();
                TranscodeStep::Delta
            }
            BackendEvent::Finish(payload) => {
                let header = self.header(payload.id.as_deref());
                encode_chunk_into(
                    out,
                    header,
                    ChunkPayload::Finish(payload.reason()),
                    self.options.framing,
                );
                self.chunks += 1;
                self.finished = true;
                TranscodeStep::Finished
            }
            BackendEvent::Other { event_type } => {
                tracing::debug!(event_type = %event_type, "ignoring backend event");
                TranscodeStep::Skipped
            }
        }
    }

    /// Every chunk is stamped with the time it is encoded.
    fn header<'a>(&'a self, id: Option<&'a str>) -> ChunkHeader<'a> {
        ChunkHeader {
            id: id.filter(|id| !id.is_empty()).unwrap_or(&self.options.fallback_id),
            model: &self.options.model,
            created: unix_now_secs(),
        }
    }

    #[must_use]
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    #[must_use]
    pub fn text_bytes(&self) -> usize {
        self.text_bytes
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

struct TranscodeState {
    events: Option<EventStream>,
    transcoder: StreamTranscoder,
    started: Instant,
}

impl Drop for TranscodeState {
    fn drop(&mut self) {
        if self.events.is_some() {
            tracing::debug!(
                chunks = self.transcoder.chunks(),
                "client stream dropped before finish; releasing backend reader"
            );
        }
    }
}

/// Turn a raw backend SSE byte stream into outgoing chunk bytes.
///
/// The backend reader is released exactly once: when `finish` is seen, when
/// an error is yielded, or when the returned stream is dropped. A backend
/// stream that ends without `finish` yields a [`BridgeError::StreamDecode`]
/// item. With [`ChunkFraming::Text`] the terminal chunk is an empty item.
pub fn transcode_backend_stream<S, E>(byte_stream: S, options: TranscodeOptions) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = TranscodeState {
        events: Some(backend_event_stream(byte_stream).boxed()),
        transcoder: StreamTranscoder::new(options),
        started: Instant::now(),
    };

    futures_util::stream::unfold(state, |mut state| async move {
        let mut out = String::new();
        loop {
            let events = state.events.as_mut()?;
            let next = events.next().await;
            let item = match next {
                Some(Ok(event)) => match state.transcoder.encode_event(&event, &mut out) {
                    TranscodeStep::Delta => Ok(Bytes::from(out)),
                    TranscodeStep::Finished => {
                        state.events = None;
                        let reason = match &event {
                            BackendEvent::Finish(payload) => payload.reason(),
                            _ => "",
                        };
                        log_stream_complete(
                            &state.transcoder.options.model,
                            state.transcoder.chunks(),
                            state.transcoder.text_bytes(),
                            reason,
                            state.started.elapsed(),
                        );
                        Ok(Bytes::from(out))
                    }
                    TranscodeStep::Skipped => continue,
                },
                Some(Err(err)) => {
                    state.events = None;
                    Err(err)
                }
                None => {
                    state.events = None;
                    Err(BridgeError::StreamDecode(
                        "backend stream ended before finish".to_string(),
                    ))
                }
            };
            return Some((item, state));
        }
    })
    .boxed()
}
