use crate::config::ConfigError;

/// Error type shared by every stage of a bridged request.
///
/// The variants only matter for diagnostics: callers always see the same
/// `{"error":{"message":...}}` body with a 500 status.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Invalid request: {0}")]
    RequestShape(String),
    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),
    #[error("Stream decode error: {0}")]
    StreamDecode(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

/// Diagnostic label for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RequestShape,
    UpstreamTransport,
    StreamDecode,
    Config,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::RequestShape => "request_shape",
            ErrorKind::UpstreamTransport => "upstream_transport",
            ErrorKind::StreamDecode => "stream_decode",
            ErrorKind::Config => "config",
        }
    }
}

impl BridgeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::RequestShape(_) => ErrorKind::RequestShape,
            BridgeError::UpstreamTransport(_) => ErrorKind::UpstreamTransport,
            BridgeError::StreamDecode(_) => ErrorKind::StreamDecode,
            BridgeError::Config(_) => ErrorKind::Config,
        }
    }

    /// Every failure surfaces with the same status.
    #[must_use]
    pub fn status(&self) -> http::StatusCode {
        http::StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Build the single client-facing error payload.
#[must_use]
pub fn error_payload(message: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": message,
        }
    })
}

/// Format an error as `(status, JSON body)`.
#[must_use]
pub fn format_error(err: &BridgeError) -> (http::StatusCode, serde_json::Value) {
    (err.status(), error_payload(&err.to_string()))
}
