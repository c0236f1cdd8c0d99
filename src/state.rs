mod request_id;

use crate::config::AppConfig;
use crate::error::BridgeError;
use crate::transport::HttpTransport;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, transport: HttpTransport) -> Self {
        Self {
            config,
            transport,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Build the backend transport from `config` and wrap both.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when the transport cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, BridgeError> {
        let transport = HttpTransport::new(&config.server, &config.backend)?;
        Ok(Self::new(config, transport))
    }

    pub fn next_request_seq(&self) -> u64 {
        self.request_ids.next_seq()
    }

    #[must_use]
    pub fn request_uuid(&self, request_seq: u64) -> uuid::Uuid {
        self.request_ids.request_uuid(request_seq)
    }
}
