//! Per-route WebSocket behavior.
//!
//! A [`WsBehavior`] bundles the engine-enforced limits of a WebSocket route
//! with its event handlers. The upgrade handler's argument type `U` is left
//! to the server crate, which owns the HTTP request and response types.
//!
//! ```rust
//! use rivet_core::Callback;
//! use rivet_ws::{Connection, WsBehavior};
//!
//! let behavior: WsBehavior<()> = WsBehavior::new()
//!     .idle_timeout(30)
//!     .open(Callback::sync(|ws: Connection| {
//!         ws.subscribe("broadcast");
//!         Ok(())
//!     }));
//! assert_eq!(behavior.options().idle_timeout, 30);
//! ```

use std::fmt;

use bytes::Bytes;
use rivet_core::transport::{CompressOptions, WsRouteOptions};
use rivet_core::Callback;

use crate::connection::Connection;
use crate::message::Message;

/// Arguments of a close handler: connection, close code, reason.
pub type CloseArgs = (Connection, u16, Bytes);

/// Arguments of a subscription handler: connection, topic, new count, old count.
pub type SubscriptionArgs = (Connection, String, u32, u32);

/// Limits and handlers for one WebSocket route.
#[must_use]
pub struct WsBehavior<U> {
    options: WsRouteOptions,
    upgrade: Option<Callback<U>>,
    open: Option<Callback<Connection>>,
    message: Option<Callback<(Connection, Message)>>,
    drain: Option<Callback<Connection>>,
    ping: Option<Callback<(Connection, Bytes)>>,
    pong: Option<Callback<(Connection, Bytes)>>,
    close: Option<Callback<CloseArgs>>,
    subscription: Option<Callback<SubscriptionArgs>>,
}

impl<U> Default for WsBehavior<U> {
    fn default() -> Self {
        Self::with_options(WsRouteOptions::default())
    }
}

impl<U> Clone for WsBehavior<U> {
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            upgrade: self.upgrade.clone(),
            open: self.open.clone(),
            message: self.message.clone(),
            drain: self.drain.clone(),
            ping: self.ping.clone(),
            pong: self.pong.clone(),
            close: self.close.clone(),
            subscription: self.subscription.clone(),
        }
    }
}

impl<U> WsBehavior<U> {
    /// Default limits, no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the given limits.
    pub fn with_options(options: WsRouteOptions) -> Self {
        Self {
            options,
            upgrade: None,
            open: None,
            message: None,
            drain: None,
            ping: None,
            pong: None,
            close: None,
            subscription: None,
        }
    }

    /// The route limits.
    pub fn options(&self) -> &WsRouteOptions {
        &self.options
    }

    /// Sets permessage-deflate options.
    pub fn compression(mut self, compression: CompressOptions) -> Self {
        self.options.compression = compression;
        self
    }

    /// Sets the maximum accepted message size.
    pub fn max_payload_length(mut self, bytes: u32) -> Self {
        self.options.max_payload_length = bytes;
        self
    }

    /// Sets the idle timeout in seconds.
    pub fn idle_timeout(mut self, seconds: u16) -> Self {
        self.options.idle_timeout = seconds;
        self
    }

    /// Sets the send-buffer size above which sends report backpressure.
    pub fn max_backpressure(mut self, bytes: u32) -> Self {
        self.options.max_backpressure = bytes;
        self
    }

    /// Closes the socket instead of buffering past the backpressure limit.
    pub fn close_on_backpressure_limit(mut self, enabled: bool) -> Self {
        self.options.close_on_backpressure_limit = enabled;
        self
    }

    /// Resets the idle timer on sends as well as receives.
    pub fn reset_idle_timeout_on_send(mut self, enabled: bool) -> Self {
        self.options.reset_idle_timeout_on_send = enabled;
        self
    }

    /// Lets the engine send pings before the idle timeout fires.
    pub fn send_pings_automatically(mut self, enabled: bool) -> Self {
        self.options.send_pings_automatically = enabled;
        self
    }

    /// Sets the maximum connection lifetime in minutes (0 disables).
    pub fn max_lifetime(mut self, minutes: u16) -> Self {
        self.options.max_lifetime = minutes;
        self
    }

    /// Handles the HTTP upgrade request. Without one, upgrades are accepted as-is.
    pub fn upgrade(mut self, handler: Callback<U>) -> Self {
        self.upgrade = Some(handler);
        self
    }

    /// Handles a newly opened connection.
    pub fn open(mut self, handler: Callback<Connection>) -> Self {
        self.open = Some(handler);
        self
    }

    /// Handles a complete message.
    pub fn message(mut self, handler: Callback<(Connection, Message)>) -> Self {
        self.message = Some(handler);
        self
    }

    /// Handles a drained send buffer.
    pub fn drain(mut self, handler: Callback<Connection>) -> Self {
        self.drain = Some(handler);
        self
    }

    /// Handles a ping.
    pub fn ping(mut self, handler: Callback<(Connection, Bytes)>) -> Self {
        self.ping = Some(handler);
        self
    }

    /// Handles a pong.
    pub fn pong(mut self, handler: Callback<(Connection, Bytes)>) -> Self {
        self.pong = Some(handler);
        self
    }

    /// Handles connection close.
    pub fn close(mut self, handler: Callback<CloseArgs>) -> Self {
        self.close = Some(handler);
        self
    }

    /// Handles topic subscriber count changes.
    pub fn subscription(mut self, handler: Callback<SubscriptionArgs>) -> Self {
        self.subscription = Some(handler);
        self
    }

    /// The upgrade handler.
    pub fn upgrade_handler(&self) -> Option<&Callback<U>> {
        self.upgrade.as_ref()
    }

    /// The open handler.
    pub fn open_handler(&self) -> Option<&Callback<Connection>> {
        self.open.as_ref()
    }

    /// The message handler.
    pub fn message_handler(&self) -> Option<&Callback<(Connection, Message)>> {
        self.message.as_ref()
    }

    /// The drain handler.
    pub fn drain_handler(&self) -> Option<&Callback<Connection>> {
        self.drain.as_ref()
    }

    /// The ping handler.
    pub fn ping_handler(&self) -> Option<&Callback<(Connection, Bytes)>> {
        self.ping.as_ref()
    }

    /// The pong handler.
    pub fn pong_handler(&self) -> Option<&Callback<(Connection, Bytes)>> {
        self.pong.as_ref()
    }

    /// The close handler.
    pub fn close_handler(&self) -> Option<&Callback<CloseArgs>> {
        self.close.as_ref()
    }

    /// The subscription handler.
    pub fn subscription_handler(&self) -> Option<&Callback<SubscriptionArgs>> {
        self.subscription.as_ref()
    }
}

impl<U> fmt::Debug for WsBehavior<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsBehavior")
            .field("options", &self.options)
            .field("upgrade", &self.upgrade.is_some())
            .field("open", &self.open.is_some())
            .field("message", &self.message.is_some())
            .field("close", &self.close.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let behavior = WsBehavior::<()>::new();
        assert_eq!(behavior.options().max_payload_length, 16 * 1024);
        assert_eq!(behavior.options().idle_timeout, 120);
        assert_eq!(behavior.options().max_backpressure, 64 * 1024);
        assert!(behavior.open_handler().is_none());
        assert!(behavior.close_handler().is_none());
    }

    #[test]
    fn test_builder_sets_limits_and_handlers() {
        let behavior = WsBehavior::<()>::new()
            .compression(CompressOptions::SHARED_COMPRESSOR)
            .max_payload_length(1024)
            .max_lifetime(5)
            .send_pings_automatically(true)
            .message(Callback::sync(|(ws, msg): (Connection, Message)| {
                ws.send_message(&msg);
                Ok(())
            }))
            .close(Callback::task(|(_ws, _code, _reason): CloseArgs| async { Ok(()) }));

        assert_eq!(behavior.options().max_payload_length, 1024);
        assert_eq!(behavior.options().max_lifetime, 5);
        assert!(behavior.options().send_pings_automatically);
        assert!(behavior.options().compression.is_enabled());
        assert!(behavior.message_handler().is_some_and(|h| !h.is_task()));
        assert!(behavior.close_handler().is_some_and(Callback::is_task));
    }
}
