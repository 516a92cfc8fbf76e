mod request_id;

use crate::config::AppConfig;
use crate::error::GatewayError;
use crate::protocol::anthropic::decoder::DecodeOptions;
use crate::routing::ModelMapper;
use crate::transport::HttpBackend;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
///
/// Built once at startup and shared read-only behind an `Arc`.
pub struct AppState {
    pub config: AppConfig,
    pub backend: HttpBackend,
    pub model_mapper: ModelMapper,
    request_ids: RequestIdGenerator,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, backend: HttpBackend, model_mapper: ModelMapper) -> Self {
        Self {
            config,
            backend,
            model_mapper,
            request_ids: RequestIdGenerator::new(),
        }
    }

    /// Build the backend client and model mapper from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when the backend client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let backend = HttpBackend::new(&config.backend)?;
        let model_mapper = ModelMapper::new(&config.model_mapping);
        Ok(Self::new(config, backend, model_mapper))
    }

    #[must_use]
    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            image_placeholder: self.config.features.image_placeholder,
        }
    }

    #[must_use]
    pub fn next_request_id(&self) -> String {
        self.request_ids.next_id()
    }
}
