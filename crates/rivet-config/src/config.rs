//! The root configuration type.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, LogFormat, LoggingConfig, PoolsConfig, ServerConfig, WebSocketConfig};

/// Complete Rivet application configuration.
///
/// Load it with [`ConfigLoader`](crate::ConfigLoader) and hand it to
/// `App::from_config`.
///
/// # Example
///
/// ```
/// use rivet_config::RivetConfig;
///
/// let config = RivetConfig::default();
/// assert_eq!(config.server.port, 8000);
/// assert_eq!(config.pools.request, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct RivetConfig {
    /// Listen address and reactor settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Wrapper pool capacities.
    #[serde(default)]
    pub pools: PoolsConfig,

    /// WebSocket route defaults.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RivetConfig {
    /// Checks values serde cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::invalid_value("server.host", "must not be empty"));
        }
        if self.websocket.max_payload_length == 0 {
            return Err(ConfigError::invalid_value(
                "websocket.max_payload_length",
                "must be greater than zero",
            ));
        }
        if self.websocket.max_backpressure == 0 {
            return Err(ConfigError::invalid_value(
                "websocket.max_backpressure",
                "must be greater than zero",
            ));
        }
        rivet_telemetry::logging::create_env_filter(&self.logging.level)
            .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;
        Ok(())
    }

    /// Pretty debug logs on localhost.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.host = "127.0.0.1".to_string();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config
    }

    /// JSON info logs with pooled wrappers.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.pools = PoolsConfig {
            request: 256,
            response: 256,
            websocket: 256,
        };
        config
    }
}
