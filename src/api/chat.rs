use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::Response;
use tracing::Instrument;

use crate::error::BridgeError;
use crate::protocol::openai_chat::ChatCompletionRequest;
use crate::protocol::translate::{translate_messages, HistoryMode};
use crate::state::AppState;
use crate::util::format_request_seq_hex;

use super::respond::{
    dispatch_response, error_response, DispatchPlan, OutgoingResponse, ResponseMode,
};

/// `POST {base_path}/v1/chat/completions`.
///
/// Every failure, whatever stage it comes from, becomes the single
/// `{"error":{"message":...}}` response with status 500.
pub async fn handler(state: Arc<AppState>, headers: &HeaderMap, body: &[u8]) -> Response {
    let request_seq = state.next_request_seq();
    let request_id = state.request_uuid(request_seq);
    let span = tracing::info_span!(
        "chat_completion",
        %request_id,
        mode = tracing::field::Empty
    );

    let outgoing = match handler_inner(&state, headers, body, request_seq)
        .instrument(span.clone())
        .await
    {
        Ok(response) => response,
        Err(err) => {
            span.in_scope(|| {
                tracing::warn!(kind = err.kind().as_str(), error = %err, "chat completion failed");
            });
            error_response(&err)
        }
    };
    outgoing.into_axum()
}

fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest, BridgeError> {
    serde_json::from_slice(body)
        .map_err(|err| BridgeError::RequestShape(format!("invalid chat completion body: {err}")))
}

async fn handler_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    request_seq: u64,
) -> Result<OutgoingResponse, BridgeError> {
    let request = parse_request(body)?;
    let features = &state.config.features;
    let backend = &state.config.backend;

    let mode = ResponseMode::select(headers, request.stream, features.honor_stream_flag);
    tracing::Span::current().record("mode", mode.as_str());
    let backend_request = translate_messages(
        &request.messages,
        backend,
        HistoryMode::from_strict_flag(features.strict_history),
    )?;
    tracing::info!(
        messages = request.messages.len(),
        history_turns = backend_request.history.len(),
        "forwarding chat completion"
    );

    let byte_stream = state.transport.open_backend_stream(&backend_request).await?;

    let model = if request.model.trim().is_empty() {
        backend.model.clone()
    } else {
        request.model
    };
    let plan = DispatchPlan {
        model,
        fallback_id: format_request_seq_hex("chatcmpl-", request_seq),
        stream_framing: features.stream_framing,
        aggregate_framing: features.aggregate_framing,
    };
    dispatch_response(mode, byte_stream, plan).await
}
