//! Typed configuration for Rivet applications.
//!
//! [`RivetConfig`] groups everything an app reads at startup:
//!
//! - [`ServerConfig`] - listen address and reactor idle interval
//! - [`PoolsConfig`] - request, response and connection pool capacities
//! - [`WebSocketConfig`] - defaults for every WebSocket route
//! - [`LoggingConfig`] - log level and format
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//! idle_poll_interval_ms = 1
//!
//! [pools]
//! request = 256
//! response = 256
//! websocket = 64
//!
//! [websocket]
//! compression = true
//! idle_timeout_secs = 60
//! max_backpressure = 1048576
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! With [`ConfigLoader::with_env_prefix`], any value can be overridden as
//! `PREFIX__SECTION__KEY`, e.g. `RIVET__SERVER__PORT=9000` or
//! `RIVET__LOGGING__FORMAT=pretty`.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::RivetConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::*;
