//! Pooled WebSocket connection wrappers.
//!
//! A [`Connection`] is acquired from the connection pool for each engine
//! event and released when the handler for that event finishes. Use
//! [`Connection::retain`] to keep a wrapper past that point, e.g. to send
//! from a background task.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use rivet_core::extension::{Extensible, Extensions};
use rivet_core::pool::{Pool, Poolable, Pooled};
use rivet_core::scheduler::IdleFlag;
use rivet_core::transport::{Engine, NativeSocket, OpCode, SendStatus, Token};
use rivet_core::{Callback, RivetError, RivetResult};
use rivet_telemetry::metrics::{self, AcquireSource};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::Message;
use crate::user_data::UserDataMap;

/// Shared state every connection wrapper needs.
pub struct WsContext {
    engine: Rc<dyn Engine>,
    idle: IdleFlag,
    pool: Pool<ConnectionState>,
    user_data: UserDataMap,
}

impl WsContext {
    /// Creates the context with a connection pool of `capacity`.
    pub fn new(
        engine: Rc<dyn Engine>,
        idle: IdleFlag,
        capacity: usize,
        user_data: UserDataMap,
    ) -> Rc<Self> {
        Rc::new(Self {
            engine,
            idle,
            pool: Pool::new("websocket", capacity),
            user_data,
        })
    }

    /// The connection pool.
    pub fn pool(&self) -> &Pool<ConnectionState> {
        &self.pool
    }

    /// The app-wide user data map.
    pub fn user_data(&self) -> &UserDataMap {
        &self.user_data
    }

    /// Wraps `socket` for one event.
    pub fn acquire(self: &Rc<Self>, socket: Rc<dyn NativeSocket>) -> Connection {
        let handle = self.pool.acquire(socket);
        let source = if handle.is_returnable() {
            AcquireSource::Pooled
        } else {
            AcquireSource::Transient
        };
        metrics::record_acquire(self.pool.kind(), source);
        Connection {
            handle,
            ctx: Rc::clone(self),
        }
    }

    /// Returns an event wrapper to the pool.
    pub fn release(&self, connection: &Connection) -> bool {
        self.pool.release(&connection.handle)
    }

    /// Broadcasts to every subscriber of `topic`, the publisher included.
    pub fn publish(&self, topic: &str, message: &[u8], opcode: OpCode, compress: bool) -> bool {
        self.idle.mark_busy();
        metrics::record_publish();
        debug!(topic, bytes = message.len(), "publish");
        self.engine.publish(topic, message, opcode, compress)
    }

    /// Number of sockets subscribed to `topic`.
    pub fn num_subscribers(&self, topic: &str) -> u32 {
        self.engine.num_subscribers(topic)
    }
}

impl fmt::Debug for WsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsContext")
            .field("pool", &self.pool)
            .field("user_data", &self.user_data)
            .finish()
    }
}

#[derive(Clone)]
struct CachedUserData {
    id: Option<Uuid>,
    value: Option<Rc<dyn Any>>,
}

/// Per-event state of a pooled connection wrapper.
#[derive(Default)]
pub struct ConnectionState {
    socket: Option<Rc<dyn NativeSocket>>,
    user_data: Option<CachedUserData>,
    extensions: Extensions<Connection>,
}

impl Poolable for ConnectionState {
    type Native = dyn NativeSocket;
    type Handle = Connection;

    fn detached() -> Self {
        Self::default()
    }

    fn bind(&mut self, native: Rc<dyn NativeSocket>) {
        self.socket = Some(native);
    }

    fn reset(&mut self) {
        self.socket = None;
        self.user_data = None;
    }

    fn extensions_mut(&mut self) -> &mut Extensions<Connection> {
        &mut self.extensions
    }
}

/// A WebSocket connection handle.
///
/// Cheap to clone. Every operation on a released handle is a no-op that
/// reports failure (`SendStatus::Dropped`, `false`, `None`).
#[derive(Clone)]
pub struct Connection {
    handle: Pooled<ConnectionState>,
    ctx: Rc<WsContext>,
}

impl Connection {
    fn socket(&self) -> Option<Rc<dyn NativeSocket>> {
        self.handle.with(|state| state.socket.clone()).flatten()
    }

    fn sent(&self, status: SendStatus) -> SendStatus {
        if status.is_accepted() {
            self.ctx.idle.mark_busy();
        }
        status
    }

    /// Engine token of this wrapper.
    pub fn token(&self) -> Token {
        self.handle.token()
    }

    /// `true` until the wrapper is released.
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Sends a complete message.
    pub fn send(&self, payload: impl AsRef<[u8]>, opcode: OpCode, compress: bool) -> SendStatus {
        match self.socket() {
            Some(socket) => self.sent(socket.send(payload.as_ref(), opcode, compress, true)),
            None => SendStatus::Dropped,
        }
    }

    /// Sends a text message.
    pub fn send_text(&self, text: &str) -> SendStatus {
        self.send(text, OpCode::Text, false)
    }

    /// Sends a [`Message`] with its natural opcode.
    pub fn send_message(&self, message: &Message) -> SendStatus {
        self.send(message.as_bytes(), message.opcode(), false)
    }

    /// Starts a fragmented message.
    pub fn send_first_fragment(
        &self,
        payload: impl AsRef<[u8]>,
        opcode: OpCode,
        compress: bool,
    ) -> SendStatus {
        match self.socket() {
            Some(socket) => {
                self.sent(socket.send_first_fragment(payload.as_ref(), opcode, compress))
            }
            None => SendStatus::Dropped,
        }
    }

    /// Sends a continuation fragment.
    pub fn send_fragment(&self, payload: impl AsRef<[u8]>, compress: bool) -> SendStatus {
        match self.socket() {
            Some(socket) => self.sent(socket.send_fragment(payload.as_ref(), compress)),
            None => SendStatus::Dropped,
        }
    }

    /// Finishes a fragmented message.
    pub fn send_last_fragment(&self, payload: impl AsRef<[u8]>, compress: bool) -> SendStatus {
        match self.socket() {
            Some(socket) => self.sent(socket.send_last_fragment(payload.as_ref(), compress)),
            None => SendStatus::Dropped,
        }
    }

    /// Runs `scope` with every send batched into one network write.
    pub fn cork<F: FnOnce(&Connection)>(&self, scope: F) -> &Self {
        let Some(socket) = self.socket() else {
            return self;
        };
        let mut scope = Some(scope);
        socket.cork(&mut || {
            if let Some(scope) = scope.take() {
                scope(self);
            }
        });
        self
    }

    /// Corks a dynamically supplied callback.
    ///
    /// Task callbacks are rejected before anything is written. An error
    /// returned by a synchronous callback is logged.
    pub fn cork_callback(&self, callback: &Callback<Connection>) -> RivetResult<&Self> {
        let f = match callback {
            Callback::Sync(f) => Rc::clone(f),
            Callback::Task(_) => return Err(RivetError::SuspendInCork),
        };
        Ok(self.cork(|ws| {
            if let Err(e) = f(ws.clone()) {
                warn!(error = %e, "error inside corked websocket callback");
            }
        }))
    }

    /// Sends one message inside a cork.
    pub fn cork_send(&self, payload: impl AsRef<[u8]>, opcode: OpCode, compress: bool) -> SendStatus {
        let mut status = SendStatus::Dropped;
        self.cork(|ws| status = ws.send(payload, opcode, compress));
        status
    }

    /// Closes gracefully with a close frame.
    pub fn end(&self, code: u16, message: impl AsRef<[u8]>) {
        if let Some(socket) = self.socket() {
            self.ctx.idle.mark_busy();
            socket.end(code, message.as_ref());
        }
    }

    /// Closes the TCP connection immediately.
    pub fn close(&self) {
        if let Some(socket) = self.socket() {
            self.ctx.idle.mark_busy();
            socket.close();
        }
    }

    /// Subscribes to `topic`. Returns `false` if already subscribed.
    pub fn subscribe(&self, topic: &str) -> bool {
        self.socket().is_some_and(|s| s.subscribe(topic))
    }

    /// Unsubscribes from `topic`. Returns `false` if not subscribed.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.socket().is_some_and(|s| s.unsubscribe(topic))
    }

    /// `true` if subscribed to `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.socket().is_some_and(|s| s.is_subscribed(topic))
    }

    /// Current subscriptions.
    pub fn topics(&self) -> Vec<String> {
        self.socket().map(|s| s.topics()).unwrap_or_default()
    }

    /// Visits every subscribed topic.
    pub fn for_each_topic(&self, mut visit: impl FnMut(&str)) {
        for topic in self.topics() {
            visit(&topic);
        }
    }

    /// Publishes through the app, so this connection receives the message
    /// too if it is subscribed.
    pub fn publish(
        &self,
        topic: &str,
        message: impl AsRef<[u8]>,
        opcode: OpCode,
        compress: bool,
    ) -> bool {
        self.ctx.publish(topic, message.as_ref(), opcode, compress)
    }

    /// Bytes waiting in the send buffer.
    pub fn buffered_amount(&self) -> usize {
        self.socket().map_or(0, |s| s.buffered_amount())
    }

    /// Peer address.
    pub fn remote_address(&self) -> Option<String> {
        self.socket().and_then(|s| s.remote_address())
    }

    fn cached_user_data(&self) -> Option<CachedUserData> {
        if let Some(cached) = self.handle.with(|state| state.user_data.clone()).flatten() {
            return Some(cached);
        }
        let socket = self.socket()?;
        let id = socket.user_data();
        let value = id.and_then(|id| self.ctx.user_data.get(&id));
        let cached = CachedUserData { id, value };
        self.handle
            .with_mut(|state| state.user_data = Some(cached.clone()));
        Some(cached)
    }

    /// Resolves and caches the user data now, while the association exists.
    pub fn prefetch_user_data(&self) {
        let _ = self.cached_user_data();
    }

    /// The data passed to `upgrade`, if it has type `T`.
    pub fn get_user_data<T: 'static>(&self) -> Option<Rc<T>> {
        self.cached_user_data()?.value?.downcast::<T>().ok()
    }

    /// The association key created at upgrade time.
    pub fn get_user_data_uuid(&self) -> Option<Uuid> {
        self.cached_user_data()?.id
    }

    /// A wrapper bound to the same socket that is not released when the
    /// current event ends.
    ///
    /// Returns `None` if this handle is already released.
    pub fn retain(&self) -> Option<Connection> {
        let socket = self.socket()?;
        let cached = self.cached_user_data();
        let handle = self.ctx.pool.acquire_unpooled(socket);
        handle.with_mut(|state| state.user_data = cached);
        Some(Connection {
            handle,
            ctx: Rc::clone(&self.ctx),
        })
    }
}

impl Extensible for Connection {
    fn with_extensions<R>(&self, f: impl FnOnce(&mut Extensions<Self>) -> R) -> Option<R> {
        self.handle.with_mut(|state| f(&mut state.extensions))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("token", &self.token())
            .field("live", &self.is_live())
            .finish()
    }
}
