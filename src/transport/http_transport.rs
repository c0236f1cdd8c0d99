use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use http::{HeaderName, HeaderValue};

use crate::config::{BackendConfig, ServerConfig};
use crate::error::BridgeError;
use crate::protocol::backend::BackendRequest;
use crate::util::sanitize_backend_error;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    read_timeout: Duration,
) -> Result<reqwest::Client, BridgeError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        // Per-read bound: a long generation stays open while bytes keep flowing.
        .read_timeout(read_timeout)
        .build()
        .map_err(|err| BridgeError::Config(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the single configured backend.
///
/// The endpoint URL and credential header are parsed once at construction.
pub struct HttpTransport {
    client: reqwest::Client,
    url: url::Url,
    credential_header: HeaderName,
    credential_value: HeaderValue,
}

impl HttpTransport {
    /// Create a transport with connection pooling and timeouts from `server`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when the backend URL or credential
    /// cannot be used, or the client cannot be built.
    pub fn new(server: &ServerConfig, backend: &BackendConfig) -> Result<Self, BridgeError> {
        let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(server.timeout),
        )?;

        let url = url::Url::parse(&backend.url)
            .map_err(|err| BridgeError::Config(format!("Invalid backend url: {err}")))?;
        let credential_header = HeaderName::from_bytes(backend.credential_header.as_bytes())
            .map_err(|err| BridgeError::Config(format!("Invalid credential header: {err}")))?;
        let mut credential_value = HeaderValue::from_str(&backend.token)
            .map_err(|err| BridgeError::Config(format!("Invalid backend token: {err}")))?;
        credential_value.set_sensitive(true);

        Ok(Self {
            client,
            url,
            credential_header,
            credential_value,
        })
    }

    /// POST `request` to the backend and return its SSE body as a byte stream.
    ///
    /// The connection is held by the returned stream; dropping it releases
    /// the connection.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UpstreamTransport`] when the backend cannot be
    /// reached or answers with a non-success status.
    pub async fn open_backend_stream(
        &self,
        request: &BackendRequest,
    ) -> Result<impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static, BridgeError> {
        let body = serde_json::to_vec(request).map_err(|err| {
            BridgeError::RequestShape(format!("Failed to encode backend request: {err}"))
        })?;

        let response = self
            .client
            .post(self.url.clone())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::ACCEPT, "text/event-stream")
            .header(self.credential_header.clone(), self.credential_value.clone())
            .body(body)
            .send()
            .await
            .map_err(|err| {
                BridgeError::UpstreamTransport(format!("Backend request failed: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let message = sanitize_backend_error(&body);
            tracing::warn!(status = status.as_u16(), error = %message, "backend rejected request");
            return Err(BridgeError::UpstreamTransport(format!(
                "Backend returned {}: {message}",
                status.as_u16()
            )));
        }

        Ok(response.bytes_stream())
    }
}
