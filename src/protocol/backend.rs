//! GeekChat backend wire types.
//!
//! Requests carry a `prompt` plus prior turns as `history`; responses are an
//! SSE stream of `add` (text token) and `finish` events.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::BridgeError;
use crate::stream::SseEvent;

pub const EVENT_ADD: &str = "add";
pub const EVENT_FINISH: &str = "finish";

/// Finish reason used when the backend's `finish` payload has none.
pub const DEFAULT_FINISH_REASON: &str = "stop";

/// One prior exchange in backend-native history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
}

/// Request body sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub user_id: String,
    pub user_role: i64,
    pub ide: String,
    pub ide_version: String,
    pub plugin_version: String,
    #[serde(rename = "talkId")]
    pub talk_id: String,
    pub locale: String,
    pub model: String,
    pub agent: Option<serde_json::Value>,
    pub prompt: String,
    pub history: Vec<ConversationTurn>,
}

/// Payload of an `add` event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddPayload {
    #[serde(default, deserialize_with = "deserialize_message_id")]
    pub id: Option<String>,
    pub text: String,
}

/// Payload of a `finish` event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FinishPayload {
    #[serde(default, deserialize_with = "deserialize_message_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Message ids arrive as strings or numbers; both become text.
fn deserialize_message_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(id) => Ok(Some(id)),
        serde_json::Value::Number(id) => Ok(Some(id.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "message id must be a string or number, got {other}"
        ))),
    }
}

impl FinishPayload {
    #[must_use]
    pub fn reason(&self) -> &str {
        self.finish_reason
            .as_deref()
            .filter(|reason| !reason.is_empty())
            .unwrap_or(DEFAULT_FINISH_REASON)
    }
}

/// A decoded backend SSE record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Add(AddPayload),
    Finish(FinishPayload),
    /// Any other event type; its payload is not decoded.
    Other { event_type: String },
}

impl BackendEvent {
    /// Decode a parsed SSE record.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::StreamDecode`] when an `add` or `finish` record
    /// does not carry a JSON payload of the expected shape.
    pub fn from_sse(event: SseEvent) -> Result<Self, BridgeError> {
        match event.event.as_deref() {
            Some(EVENT_ADD) => serde_json::from_str::<AddPayload>(&event.data)
                .map(BackendEvent::Add)
                .map_err(|err| decode_error(EVENT_ADD, &err)),
            Some(EVENT_FINISH) => serde_json::from_str::<FinishPayload>(&event.data)
                .map(BackendEvent::Finish)
                .map_err(|err| decode_error(EVENT_FINISH, &err)),
            other => Ok(BackendEvent::Other {
                event_type: other.unwrap_or("message").to_owned(),
            }),
        }
    }
}

fn decode_error(event_type: &str, err: &serde_json::Error) -> BridgeError {
    BridgeError::StreamDecode(format!("invalid '{event_type}' payload: {err}"))
}
