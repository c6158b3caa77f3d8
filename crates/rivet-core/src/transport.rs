//! Interface to the native transport engine.
//!
//! The engine owns sockets, TLS, HTTP parsing and WebSocket framing. Rivet
//! talks to it through three kinds of native handles ([`NativeRequest`],
//! [`NativeResponse`], [`NativeSocket`]) and receives events through an
//! [`EventSink`]. All calls happen on one reactor thread, so none of these
//! traits require `Send`.
//!
//! Wrappers never hand raw pointers to the engine. When a wrapper wants
//! per-request callbacks (abort, data, writable) it registers a [`Token`],
//! a pool index plus generation counter. The engine echoes the token back
//! and the sink resolves it against the pool; a token whose slot has since
//! been released no longer resolves, so late events are dropped instead of
//! reaching the next request that reuses the slot.
//!
//! # Event flow
//!
//! ```text
//! Engine::poll ──► EventSink::on_request(route, res, req)
//!                      │
//!                      ├─► res.on_aborted(token) ──► EventSink::on_aborted(token)
//!                      ├─► res.on_data(token)    ──► EventSink::on_data(token, chunk, end)
//!                      └─► res.on_writable(token)──► EventSink::on_writable(token, offset)
//! ```

use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use http::Method;
use uuid::Uuid;

/// Generation-checked reference to a pooled wrapper.
///
/// Stands in for the opaque user-data pointer a C engine would carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token {
    index: u32,
    generation: u32,
}

impl Token {
    /// Creates a token from a slot index and generation.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the owning pool.
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the token was issued.
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Identifier of a registered route, assigned in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub usize);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route#{}", self.0)
    }
}

/// Which request methods a route answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    /// Every method.
    Any,
    /// A single method.
    Only(Method),
}

impl MethodFilter {
    /// Returns `true` if `method` is accepted by this filter.
    pub fn matches(&self, method: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(m) => m.as_str().eq_ignore_ascii_case(method),
        }
    }
}

/// WebSocket frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message.
    Continuation = 0,
    /// UTF-8 text frame.
    Text = 1,
    /// Binary frame.
    Binary = 2,
    /// Close frame.
    Close = 8,
    /// Ping frame.
    Ping = 9,
    /// Pong frame.
    Pong = 10,
}

impl OpCode {
    /// Parses a raw opcode.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Continuation),
            1 => Some(Self::Text),
            2 => Some(Self::Binary),
            8 => Some(Self::Close),
            9 => Some(Self::Ping),
            10 => Some(Self::Pong),
            _ => None,
        }
    }

    /// Returns the raw opcode.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Outcome of a WebSocket send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SendStatus {
    /// Accepted but buffered; wait for drain before sending more.
    Backpressure = 0,
    /// Written to the socket.
    Success = 1,
    /// Dropped because the backpressure limit was exceeded.
    Dropped = 2,
}

impl SendStatus {
    /// Returns `true` unless the message was dropped.
    pub const fn is_accepted(self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

/// Per-message-deflate settings for a WebSocket route.
///
/// Values are bit-compatible with the engine's compressor flags so they can
/// be combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompressOptions(pub u16);

impl CompressOptions {
    /// Compression disabled.
    pub const DISABLED: Self = Self(0);
    /// One compressor shared by all sockets.
    pub const SHARED_COMPRESSOR: Self = Self(1);
    /// One decompressor shared by all sockets.
    pub const SHARED_DECOMPRESSOR: Self = Self(1 << 8);
    /// Dedicated 32 KB decompression window.
    pub const DEDICATED_DECOMPRESSOR_32KB: Self = Self(15 << 8);
    /// Dedicated 16 KB decompression window.
    pub const DEDICATED_DECOMPRESSOR_16KB: Self = Self(14 << 8);
    /// Dedicated 8 KB decompression window.
    pub const DEDICATED_DECOMPRESSOR_8KB: Self = Self(13 << 8);
    /// Dedicated 4 KB decompression window.
    pub const DEDICATED_DECOMPRESSOR_4KB: Self = Self(12 << 8);
    /// Dedicated 2 KB decompression window.
    pub const DEDICATED_DECOMPRESSOR_2KB: Self = Self(11 << 8);
    /// Dedicated 1 KB decompression window.
    pub const DEDICATED_DECOMPRESSOR_1KB: Self = Self(10 << 8);
    /// Dedicated 512 B decompression window.
    pub const DEDICATED_DECOMPRESSOR_512B: Self = Self(9 << 8);
    /// Largest dedicated decompressor.
    pub const DEDICATED_DECOMPRESSOR: Self = Self::DEDICATED_DECOMPRESSOR_32KB;
    /// Dedicated 3 KB compressor.
    pub const DEDICATED_COMPRESSOR_3KB: Self = Self(9 << 4 | 1);
    /// Dedicated 4 KB compressor.
    pub const DEDICATED_COMPRESSOR_4KB: Self = Self(9 << 4 | 2);
    /// Dedicated 8 KB compressor.
    pub const DEDICATED_COMPRESSOR_8KB: Self = Self(10 << 4 | 3);
    /// Dedicated 16 KB compressor.
    pub const DEDICATED_COMPRESSOR_16KB: Self = Self(11 << 4 | 4);
    /// Dedicated 32 KB compressor.
    pub const DEDICATED_COMPRESSOR_32KB: Self = Self(12 << 4 | 5);
    /// Dedicated 64 KB compressor.
    pub const DEDICATED_COMPRESSOR_64KB: Self = Self(13 << 4 | 6);
    /// Dedicated 128 KB compressor.
    pub const DEDICATED_COMPRESSOR_128KB: Self = Self(14 << 4 | 7);
    /// Dedicated 256 KB compressor.
    pub const DEDICATED_COMPRESSOR_256KB: Self = Self(15 << 4 | 8);
    /// Largest dedicated compressor.
    pub const DEDICATED_COMPRESSOR: Self = Self::DEDICATED_COMPRESSOR_256KB;

    /// Returns `true` if any compression is configured.
    pub const fn is_enabled(self) -> bool {
        self.0 != 0
    }
}

impl std::ops::BitOr for CompressOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Engine-level settings for a WebSocket route.
///
/// Timeouts and limits are enforced by the engine, not by Rivet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsRouteOptions {
    /// Compression flags.
    pub compression: CompressOptions,
    /// Largest accepted message, in bytes.
    pub max_payload_length: u32,
    /// Seconds without traffic before the socket is closed.
    pub idle_timeout: u16,
    /// Bytes buffered per socket before sends report backpressure.
    pub max_backpressure: u32,
    /// Close instead of dropping when `max_backpressure` is exceeded.
    pub close_on_backpressure_limit: bool,
    /// Sending resets the idle timer.
    pub reset_idle_timeout_on_send: bool,
    /// Engine sends pings before the idle timeout elapses.
    pub send_pings_automatically: bool,
    /// Minutes before a socket is closed regardless of traffic (0 = off).
    pub max_lifetime: u16,
}

impl Default for WsRouteOptions {
    fn default() -> Self {
        Self {
            compression: CompressOptions::DISABLED,
            max_payload_length: 16 * 1024,
            idle_timeout: 120,
            max_backpressure: 64 * 1024,
            close_on_backpressure_limit: false,
            reset_idle_timeout_on_send: false,
            send_pings_automatically: false,
            max_lifetime: 0,
        }
    }
}

/// Where and how the engine should listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    /// Interface to bind.
    pub host: String,
    /// Port to bind (0 lets the engine pick).
    pub port: u16,
    /// Unix domain socket path, used instead of host/port when set.
    pub domain: Option<String>,
    /// Engine-specific listen flags.
    pub flags: i32,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            domain: None,
            flags: 0,
        }
    }
}

impl ListenOptions {
    /// Listen on the given port on all interfaces.
    pub fn port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Sets the host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets a unix domain socket path.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

impl From<u16> for ListenOptions {
    fn from(port: u16) -> Self {
        Self::port(port)
    }
}

/// The socket an engine is listening on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenInfo {
    /// Bound host.
    pub host: String,
    /// Bound port.
    pub port: u16,
    /// Unix domain socket path, if any.
    pub domain: Option<String>,
}

/// How long a single [`Engine::poll`] may wait for I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Dispatch whatever is ready and return immediately.
    NoWait,
    /// The reactor is idle; the engine may block up to the given duration.
    Wait(Duration),
}

/// Opaque per-route socket context needed to finish a WebSocket upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpgradeContext(u64);

impl UpgradeContext {
    /// Wraps an engine-defined context value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the engine-defined context value.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A request as seen by the engine.
///
/// Only valid until the wrapper that received it is released.
pub trait NativeRequest {
    /// Upper-case method name.
    fn method(&self) -> String;
    /// Path without the query string.
    fn url(&self) -> String;
    /// Raw query string without the leading `?`.
    fn query_string(&self) -> String;
    /// Decoded value of one query parameter.
    fn query(&self, key: &str) -> Option<String>;
    /// Route parameter by position.
    fn parameter(&self, index: usize) -> Option<String>;
    /// Header by lower-case name. Returns the first occurrence.
    fn header(&self, name: &str) -> Option<String>;
    /// Visits every header in arrival order.
    fn for_each_header(&self, visit: &mut dyn FnMut(&str, &str));
    /// Asks the engine to try the next matching route.
    fn set_yield(&self, yield_to_next: bool);
    /// Returns the current yield flag.
    fn get_yield(&self) -> bool;
    /// `true` for HTTP/1.0 peers.
    fn is_ancient(&self) -> bool;
}

/// A response as seen by the engine.
pub trait NativeResponse {
    /// Writes the status line text, e.g. `"200 OK"`.
    fn write_status(&self, status: &str);
    /// Writes one header.
    fn write_header(&self, name: &str, value: &str);
    /// Writes one header with a numeric value.
    fn write_header_int(&self, name: &str, value: u64);
    /// Writes a body chunk using chunked encoding. Returns `false` on backpressure.
    fn write(&self, chunk: &[u8]) -> bool;
    /// Writes the final body and ends the response.
    fn end(&self, body: &[u8], close_connection: bool);
    /// Ends the response without a body.
    fn end_without_body(&self, close_connection: bool);
    /// Attempts to write part of a body of `total_size` bytes.
    ///
    /// Returns `(ok, has_responded)`. `ok == false` means nothing more fits;
    /// the unwritten tail is not buffered and must be retried after
    /// writable.
    fn try_end(&self, chunk: &[u8], total_size: u64, close_connection: bool) -> (bool, bool);
    /// Bytes of body written so far.
    fn write_offset(&self) -> u64;
    /// Overrides the write offset.
    fn override_write_offset(&self, offset: u64);
    /// `true` once the response has been ended.
    fn has_responded(&self) -> bool;
    /// Runs `scope` with writes batched into one network send.
    fn cork(&self, scope: &mut dyn FnMut());
    /// Stops reading from the peer.
    fn pause(&self);
    /// Resumes reading from the peer.
    fn resume(&self);
    /// Sends `100 Continue`.
    fn write_continue(&self);
    /// Closes the connection immediately.
    fn close(&self);
    /// Peer address as text.
    fn remote_address(&self) -> Option<String>;
    /// Peer address reported by a proxy protocol header.
    fn proxied_remote_address(&self) -> Option<String>;
    /// Routes the abort event for this response to [`EventSink::on_aborted`].
    fn on_aborted(&self, token: Token);
    /// Routes body chunks to [`EventSink::on_data`].
    fn on_data(&self, token: Token);
    /// Routes writable notifications to [`EventSink::on_writable`].
    fn on_writable(&self, token: Token);
    /// Upgrades the request to a WebSocket carrying `user_data`.
    fn upgrade(
        &self,
        user_data: Option<Uuid>,
        key: &str,
        protocol: &str,
        extensions: &str,
        context: UpgradeContext,
    );
}

/// An open WebSocket as seen by the engine.
pub trait NativeSocket {
    /// Sends one frame.
    fn send(&self, payload: &[u8], opcode: OpCode, compress: bool, fin: bool) -> SendStatus;
    /// Sends a continuation fragment.
    fn send_fragment(&self, payload: &[u8], compress: bool) -> SendStatus;
    /// Starts a fragmented message.
    fn send_first_fragment(&self, payload: &[u8], opcode: OpCode, compress: bool) -> SendStatus;
    /// Finishes a fragmented message.
    fn send_last_fragment(&self, payload: &[u8], compress: bool) -> SendStatus;
    /// Gracefully closes with a close frame.
    fn end(&self, code: u16, message: &[u8]);
    /// Closes the TCP connection immediately.
    fn close(&self);
    /// Runs `scope` with sends batched into one network write.
    fn cork(&self, scope: &mut dyn FnMut());
    /// Subscribes to a topic. Returns `false` if already subscribed.
    fn subscribe(&self, topic: &str) -> bool;
    /// Unsubscribes from a topic. Returns `false` if not subscribed.
    fn unsubscribe(&self, topic: &str) -> bool;
    /// Returns `true` if subscribed to `topic`.
    fn is_subscribed(&self, topic: &str) -> bool;
    /// Current subscriptions.
    fn topics(&self) -> Vec<String>;
    /// Bytes waiting in the send buffer.
    fn buffered_amount(&self) -> usize;
    /// Peer address as text.
    fn remote_address(&self) -> Option<String>;
    /// The association key stored at upgrade time.
    fn user_data(&self) -> Option<Uuid>;
}

/// Receives events from the engine.
///
/// Every method is called synchronously from [`Engine::poll`].
pub trait EventSink {
    /// A request matched an HTTP route.
    fn on_request(
        &self,
        route: RouteId,
        response: Rc<dyn NativeResponse>,
        request: Rc<dyn NativeRequest>,
    );

    /// A request asked to upgrade on a WebSocket route.
    fn on_upgrade(
        &self,
        route: RouteId,
        response: Rc<dyn NativeResponse>,
        request: Rc<dyn NativeRequest>,
        context: UpgradeContext,
    );

    /// A body chunk arrived for the response registered under `token`.
    fn on_data(&self, token: Token, chunk: &[u8], is_end: bool);

    /// Send buffer space freed up. Return `false` to be called again.
    fn on_writable(&self, token: Token, offset: u64) -> bool;

    /// The peer went away before the response finished.
    fn on_aborted(&self, token: Token);

    /// A WebSocket opened.
    fn on_ws_open(&self, route: RouteId, socket: Rc<dyn NativeSocket>);

    /// A WebSocket message arrived.
    fn on_ws_message(
        &self,
        route: RouteId,
        socket: Rc<dyn NativeSocket>,
        payload: &[u8],
        opcode: OpCode,
    );

    /// A WebSocket send buffer drained.
    fn on_ws_drain(&self, route: RouteId, socket: Rc<dyn NativeSocket>);

    /// A ping arrived.
    fn on_ws_ping(&self, route: RouteId, socket: Rc<dyn NativeSocket>, payload: &[u8]);

    /// A pong arrived.
    fn on_ws_pong(&self, route: RouteId, socket: Rc<dyn NativeSocket>, payload: &[u8]);

    /// A WebSocket closed.
    fn on_ws_close(&self, route: RouteId, socket: Rc<dyn NativeSocket>, code: u16, reason: &[u8]);

    /// A topic's subscriber count changed because of `socket`.
    fn on_ws_subscription(
        &self,
        route: RouteId,
        socket: Rc<dyn NativeSocket>,
        topic: &str,
        new_count: u32,
        old_count: u32,
    );

    /// A TLS client asked for a server name that is not registered.
    fn on_missing_server_name(&self, _hostname: &str) {}
}

/// A callback-driven transport engine.
pub trait Engine {
    /// Installs the sink that receives every event.
    fn attach(&self, sink: Weak<dyn EventSink>);

    /// Registers an HTTP route.
    fn add_route(&self, method: MethodFilter, pattern: &str, route: RouteId);

    /// Registers a WebSocket route.
    fn add_ws_route(&self, pattern: &str, options: &WsRouteOptions, route: RouteId);

    /// Starts listening. Returns `None` if the socket could not be bound.
    fn listen(&self, options: &ListenOptions) -> Option<ListenInfo>;

    /// Runs one reactor iteration and returns the number of events dispatched.
    fn poll(&self, mode: PollMode) -> usize;

    /// Closes every listening socket. Open connections are left alone.
    fn close(&self);

    /// Broadcasts to every subscriber of `topic`.
    fn publish(&self, topic: &str, message: &[u8], opcode: OpCode, compress: bool) -> bool;

    /// Number of sockets subscribed to `topic`.
    fn num_subscribers(&self, topic: &str) -> u32;

    /// Registers a TLS server name.
    fn add_server_name(&self, _hostname: &str) {}

    /// Removes a TLS server name.
    fn remove_server_name(&self, _hostname: &str) {}
}
