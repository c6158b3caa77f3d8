//! Error types for Rivet.
//!
//! [`RivetError`] covers the failures the request layer itself can report:
//! fatal transport errors surfaced at startup and programming errors that
//! are rejected synchronously. Handler failures travel as
//! [`anyhow::Error`](anyhow::Error) through the error pipeline instead, and
//! peer aborts are not errors at all.

use thiserror::Error;

/// Result type alias using [`RivetError`].
pub type RivetResult<T> = Result<T, RivetError>;

/// Errors raised by the request-handling layer.
#[derive(Debug, Error)]
pub enum RivetError {
    /// The transport engine could not bind or listen.
    #[error("failed to listen on {host}:{port}")]
    Listen {
        /// Requested host.
        host: String,
        /// Requested port.
        port: u16,
    },

    /// The scheduler runtime could not be constructed.
    #[error("failed to build scheduler runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// A suspendable callback was passed where only synchronous code may run.
    #[error("calls inside cork must be synchronous")]
    SuspendInCork,

    /// A status code outside `100..=999` was written.
    #[error("invalid status code: {0}")]
    InvalidStatus(u16),

    /// The transport engine reported an unrecoverable failure.
    #[error("transport engine error: {0}")]
    Engine(String),

    /// A handler panicked while running.
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

impl RivetError {
    /// Creates a listen failure error.
    pub fn listen(host: impl Into<String>, port: u16) -> Self {
        Self::Listen {
            host: host.into(),
            port,
        }
    }

    /// Creates a transport engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }

    /// Creates a handler panic error.
    pub fn handler_panicked(message: impl Into<String>) -> Self {
        Self::HandlerPanicked(message.into())
    }

    /// Returns `true` if this error must terminate startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Listen { .. } | Self::Runtime(_) | Self::Engine(_))
    }
}
