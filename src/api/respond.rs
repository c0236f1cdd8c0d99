use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::config::ChunkFraming;
use crate::error::{format_error, BridgeError};
use crate::stream::{transcode_backend_stream, ChunkStream, TranscodeOptions};

use super::aggregate::aggregate_body;

const EVENT_STREAM: &str = "text/event-stream";

/// Whether the client receives chunks as they arrive or one final body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Streaming,
    Aggregated,
}

impl ResponseMode {
    /// Pick the mode from the `Accept` header.
    ///
    /// `Accept: text/event-stream` (exact value) selects streaming. With
    /// `honor_stream_flag`, a body `"stream": true` does too.
    #[must_use]
    pub fn select(headers: &HeaderMap, stream_flag: Option<bool>, honor_stream_flag: bool) -> Self {
        let accepts_event_stream = headers
            .get(http::header::ACCEPT)
            .is_some_and(|value| value.as_bytes() == EVENT_STREAM.as_bytes());
        if accepts_event_stream || (honor_stream_flag && stream_flag == Some(true)) {
            ResponseMode::Streaming
        } else {
            ResponseMode::Aggregated
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseMode::Streaming => "streaming",
            ResponseMode::Aggregated => "aggregated",
        }
    }
}

pub enum ResponseBody {
    Full(Bytes),
    Stream(ChunkStream),
}

/// Response descriptor handed back to the HTTP layer.
pub struct OutgoingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl std::fmt::Debug for OutgoingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &self.body {
            ResponseBody::Full(bytes) => format!("Full({} bytes)", bytes.len()),
            ResponseBody::Stream(_) => "Stream".to_string(),
        };
        f.debug_struct("OutgoingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}

impl OutgoingResponse {
    #[must_use]
    pub fn into_axum(self) -> Response {
        let body = match self.body {
            ResponseBody::Full(bytes) => Body::from(bytes),
            ResponseBody::Stream(stream) => Body::from_stream(stream),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// 200 with event-stream headers; the body is written chunk by chunk.
#[must_use]
pub fn streaming_response(chunks: ChunkStream) -> OutgoingResponse {
    let mut headers = HeaderMap::with_capacity(3);
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static(EVENT_STREAM),
    );
    headers.insert(http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    OutgoingResponse {
        status: StatusCode::OK,
        headers,
        body: ResponseBody::Stream(chunks),
    }
}

#[must_use]
pub fn json_response(status: StatusCode, body: Bytes) -> OutgoingResponse {
    let mut headers = HeaderMap::with_capacity(1);
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    OutgoingResponse {
        status,
        headers,
        body: ResponseBody::Full(body),
    }
}

/// The single error shape every failure produces.
#[must_use]
pub fn error_response(err: &BridgeError) -> OutgoingResponse {
    let (status, payload) = format_error(err);
    json_response(status, Bytes::from(payload.to_string()))
}

/// Per-response transcoding choices.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub model: String,
    pub fallback_id: String,
    pub stream_framing: ChunkFraming,
    pub aggregate_framing: ChunkFraming,
}

/// Deliver a backend SSE byte stream to the client in the requested mode.
///
/// Streaming returns immediately and forwards chunks as they are produced; a
/// mid-stream failure ends the body after the chunks already sent. Aggregated
/// drains the whole stream first and fails as a unit.
///
/// # Errors
///
/// In aggregated mode, any transport or decode failure of the backend stream.
pub async fn dispatch_response<S, E>(
    mode: ResponseMode,
    byte_stream: S,
    plan: DispatchPlan,
) -> Result<OutgoingResponse, BridgeError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    match mode {
        ResponseMode::Streaming => {
            let chunks = transcode_backend_stream(
                byte_stream,
                TranscodeOptions {
                    model: plan.model,
                    fallback_id: plan.fallback_id,
                    framing: plan.stream_framing,
                },
            )
            .inspect_err(|err| {
                tracing::warn!(
                    kind = err.kind().as_str(),
                    error = %err,
                    "stream aborted mid-response"
                );
            });
            Ok(streaming_response(Box::pin(chunks)))
        }
        ResponseMode::Aggregated => {
            let chunks = transcode_backend_stream(
                byte_stream,
                TranscodeOptions {
                    model: plan.model,
                    fallback_id: plan.fallback_id,
                    framing: plan.aggregate_framing,
                },
            );
            let body = aggregate_body(chunks).await?;
            Ok(json_response(StatusCode::OK, Bytes::from(body)))
        }
    }
}
