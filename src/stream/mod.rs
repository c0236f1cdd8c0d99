pub mod sse;
pub mod transcoder;

pub use sse::{backend_event_stream, sse_event_stream, SseParser};
pub use transcoder::{
    transcode_backend_stream, ChunkStream, StreamTranscoder, TranscodeOptions, TranscodeStep,
};

/// A parsed SSE record from the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}
