//! Configuration schema types.
//!
//! Every section denies unknown fields and fills missing ones from its
//! defaults, so a file only needs to name what it changes.

use rivet_telemetry::LogConfig;
use serde::{Deserialize, Serialize};

/// Server section: where to listen and how the reactor idles.
///
/// # Example
///
/// ```
/// use rivet_config::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.port, 8000);
/// assert_eq!(config.idle_poll_interval_ms, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long the engine may block when no task is runnable, in
    /// milliseconds.
    #[serde(default = "default_idle_poll_interval")]
    pub idle_poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            idle_poll_interval_ms: default_idle_poll_interval(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_idle_poll_interval() -> u64 {
    1
}

/// Wrapper pool capacities. Zero disables pooling for that kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct PoolsConfig {
    /// Request wrappers.
    #[serde(default)]
    pub request: usize,

    /// Response wrappers.
    #[serde(default)]
    pub response: usize,

    /// WebSocket connection wrappers.
    #[serde(default)]
    pub websocket: usize,
}

/// Defaults applied to every WebSocket route built from the app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WebSocketConfig {
    /// Shared per-message-deflate compressor and decompressor.
    #[serde(default)]
    pub compression: bool,

    /// Largest accepted message, in bytes.
    #[serde(default = "default_max_payload_length")]
    pub max_payload_length: u32,

    /// Seconds without traffic before a socket is closed.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u16,

    /// Bytes buffered per socket before sends report backpressure.
    #[serde(default = "default_max_backpressure")]
    pub max_backpressure: u32,

    /// Close instead of dropping when the backpressure limit is exceeded.
    #[serde(default)]
    pub close_on_backpressure_limit: bool,

    /// Sending resets the idle timer.
    #[serde(default)]
    pub reset_idle_timeout_on_send: bool,

    /// Engine pings before the idle timeout elapses.
    #[serde(default)]
    pub send_pings_automatically: bool,

    /// Minutes before a socket is closed regardless of traffic. Zero
    /// disables the limit.
    #[serde(default)]
    pub max_lifetime_minutes: u16,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            compression: false,
            max_payload_length: default_max_payload_length(),
            idle_timeout_secs: default_idle_timeout(),
            max_backpressure: default_max_backpressure(),
            close_on_backpressure_limit: false,
            reset_idle_timeout_on_send: false,
            send_pings_automatically: false,
            max_lifetime_minutes: 0,
        }
    }
}

fn default_max_payload_length() -> u32 {
    16 * 1024
}

fn default_idle_timeout() -> u16 {
    120
}

fn default_max_backpressure() -> u32 {
    64 * 1024
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON lines.
    #[default]
    Json,
    /// Human-readable output.
    Pretty,
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (e.g. `info` or `rivet_server=debug,info`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Converts to the settings [`rivet_telemetry::init_logging`] takes.
    ///
    /// ```
    /// use rivet_config::{LogFormat, LoggingConfig};
    ///
    /// let section = LoggingConfig {
    ///     level: "debug".to_string(),
    ///     format: LogFormat::Pretty,
    ///     ..LoggingConfig::default()
    /// };
    /// let log = section.to_log_config();
    /// assert_eq!(log.level, "debug");
    /// assert!(!log.json_format);
    /// ```
    pub fn to_log_config(&self) -> LogConfig {
        let base = match self.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        LogConfig {
            enabled: self.enabled,
            ..base.with_level(self.level.clone())
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_defaults_match_engine_defaults() {
        let ws = WebSocketConfig::default();
        assert_eq!(ws.max_payload_length, 16 * 1024);
        assert_eq!(ws.idle_timeout_secs, 120);
        assert_eq!(ws.max_backpressure, 64 * 1024);
        assert!(!ws.compression);
    }

    #[test]
    fn test_pools_default_to_unpooled() {
        assert_eq!(PoolsConfig::default(), PoolsConfig { request: 0, response: 0, websocket: 0 });
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let server: ServerConfig = toml::from_str("port = 3000").unwrap();
        assert_eq!(server.port, 3000);
        assert_eq!(server.host, "0.0.0.0");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<PoolsConfig, _> = toml::from_str("requests = 4");
        assert!(result.is_err());
    }

    #[test]
    fn test_log_format_serialization() {
        let json = serde_json::to_string(&LogFormat::Pretty).unwrap();
        assert_eq!(json, "\"pretty\"");
    }

    #[test]
    fn test_disabled_logging_carries_over() {
        let section = LoggingConfig {
            enabled: false,
            ..LoggingConfig::default()
        };
        let log = section.to_log_config();
        assert!(!log.enabled);
        assert!(log.json_format);
    }
}
