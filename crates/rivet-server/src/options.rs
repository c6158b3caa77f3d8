//! App construction options.
//!
//! # Example
//!
//! ```rust
//! use rivet_server::AppOptions;
//! use std::time::Duration;
//!
//! let options = AppOptions::builder()
//!     .request_pool(256)
//!     .response_pool(256)
//!     .idle_wait(Duration::from_millis(5))
//!     .build();
//!
//! assert_eq!(options.request_pool(), 256);
//! assert_eq!(options.websocket_pool(), 0);
//! ```

use std::time::Duration;

use rivet_config::RivetConfig;
use rivet_core::scheduler::DEFAULT_IDLE_WAIT;
use rivet_core::transport::{CompressOptions, ListenOptions, WsRouteOptions};

/// Default capacity of every wrapper pool. Zero means wrappers are built per
/// request and dropped afterwards.
pub const DEFAULT_POOL_CAPACITY: usize = 0;

/// Options fixed when an [`App`](crate::App) is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppOptions {
    request_pool: usize,
    response_pool: usize,
    websocket_pool: usize,
    idle_wait: Duration,
    listen: ListenOptions,
    ws_defaults: WsRouteOptions,
}

impl AppOptions {
    /// Creates a new options builder.
    #[must_use]
    pub fn builder() -> AppOptionsBuilder {
        AppOptionsBuilder::default()
    }

    /// Builds options from a loaded configuration.
    pub fn from_config(config: &RivetConfig) -> Self {
        let ws = &config.websocket;
        Self::builder()
            .request_pool(config.pools.request)
            .response_pool(config.pools.response)
            .websocket_pool(config.pools.websocket)
            .idle_wait(Duration::from_millis(config.server.idle_poll_interval_ms))
            .listen(ListenOptions::port(config.server.port).with_host(config.server.host.clone()))
            .ws_defaults(WsRouteOptions {
                compression: if ws.compression {
                    CompressOptions::SHARED_COMPRESSOR | CompressOptions::SHARED_DECOMPRESSOR
                } else {
                    CompressOptions::DISABLED
                },
                max_payload_length: ws.max_payload_length,
                idle_timeout: ws.idle_timeout_secs,
                max_backpressure: ws.max_backpressure,
                close_on_backpressure_limit: ws.close_on_backpressure_limit,
                reset_idle_timeout_on_send: ws.reset_idle_timeout_on_send,
                send_pings_automatically: ws.send_pings_automatically,
                max_lifetime: ws.max_lifetime_minutes,
            })
            .build()
    }

    /// Capacity of the request wrapper pool.
    pub fn request_pool(&self) -> usize {
        self.request_pool
    }

    /// Capacity of the response wrapper pool.
    pub fn response_pool(&self) -> usize {
        self.response_pool
    }

    /// Capacity of the connection wrapper pool.
    pub fn websocket_pool(&self) -> usize {
        self.websocket_pool
    }

    /// How long the reactor waits for I/O while idle.
    pub fn idle_wait(&self) -> Duration {
        self.idle_wait
    }

    /// Listen options used by [`App::listen_default`](crate::App::listen_default).
    pub fn listen(&self) -> &ListenOptions {
        &self.listen
    }

    /// Limits applied to WebSocket routes created with [`App::ws_behavior`](crate::App::ws_behavior).
    pub fn ws_defaults(&self) -> &WsRouteOptions {
        &self.ws_defaults
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`AppOptions`].
#[derive(Debug, Clone)]
#[must_use]
pub struct AppOptionsBuilder {
    options: AppOptions,
}

impl Default for AppOptionsBuilder {
    fn default() -> Self {
        Self {
            options: AppOptions {
                request_pool: DEFAULT_POOL_CAPACITY,
                response_pool: DEFAULT_POOL_CAPACITY,
                websocket_pool: DEFAULT_POOL_CAPACITY,
                idle_wait: DEFAULT_IDLE_WAIT,
                listen: ListenOptions::default(),
                ws_defaults: WsRouteOptions::default(),
            },
        }
    }
}

impl AppOptionsBuilder {
    /// Sets the request and response pool capacities together.
    pub fn request_response_pool(self, capacity: usize) -> Self {
        self.request_pool(capacity).response_pool(capacity)
    }

    /// Sets the request pool capacity.
    pub fn request_pool(mut self, capacity: usize) -> Self {
        self.options.request_pool = capacity;
        self
    }

    /// Sets the response pool capacity.
    pub fn response_pool(mut self, capacity: usize) -> Self {
        self.options.response_pool = capacity;
        self
    }

    /// Sets the connection pool capacity.
    pub fn websocket_pool(mut self, capacity: usize) -> Self {
        self.options.websocket_pool = capacity;
        self
    }

    /// Sets the idle wait.
    pub fn idle_wait(mut self, idle_wait: Duration) -> Self {
        self.options.idle_wait = idle_wait;
        self
    }

    /// Sets the default listen options.
    pub fn listen(mut self, listen: ListenOptions) -> Self {
        self.options.listen = listen;
        self
    }

    /// Sets the default WebSocket route limits.
    pub fn ws_defaults(mut self, options: WsRouteOptions) -> Self {
        self.options.ws_defaults = options;
        self
    }

    /// Builds the options.
    pub fn build(self) -> AppOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = AppOptions::default();
        assert_eq!(options.request_pool(), 0);
        assert_eq!(options.response_pool(), 0);
        assert_eq!(options.idle_wait(), DEFAULT_IDLE_WAIT);
        assert_eq!(options.listen().port, 8000);
    }

    #[test]
    fn test_request_response_pool() {
        let options = AppOptions::builder().request_response_pool(64).build();
        assert_eq!(options.request_pool(), 64);
        assert_eq!(options.response_pool(), 64);
        assert_eq!(options.websocket_pool(), 0);
    }

    #[test]
    fn test_from_config() {
        let mut config = RivetConfig::default();
        config.server.port = 4000;
        config.pools.websocket = 32;
        config.websocket.idle_timeout_secs = 30;
        config.websocket.compression = true;

        let options = AppOptions::from_config(&config);
        assert_eq!(options.listen().port, 4000);
        assert_eq!(options.websocket_pool(), 32);
        assert_eq!(options.ws_defaults().idle_timeout, 30);
        assert!(options.ws_defaults().compression.is_enabled());
    }
}
