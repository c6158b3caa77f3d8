//! Pooled response wrappers and the streaming state machine.
//!
//! ```text
//!  Idle ──write/try_end──► Writing ──backpressure──► WritableWait
//!                             ▲                          │
//!                             └──────── on_writable ─────┘
//!  any ──end / try_end(done) / upgrade──► Ended
//!  any ──peer abort──► Aborted            (terminal)
//! ```
//!
//! # Backpressure
//!
//! [`Response::try_end`] never buffers: when the engine cannot take the
//! whole chunk it reports `ok == false` and the caller must retry from the
//! engine's write offset once the socket is writable.
//! [`Response::send_chunk`] wraps that protocol in a future. It remembers
//! the offset before the first attempt and, on every writable event,
//! retries with `chunk[offset - start..]`, so the bytes delivered are
//! exactly the bytes of the chunk.
//!
//! # Abort
//!
//! When the peer disconnects the response is marked aborted, its native
//! handle is dropped and every pending future resolves immediately:
//! `send_chunk` with `(false, true)`, `get_data` with the bytes received so
//! far. Every later write is a no-op.
//!
//! # Lifetime
//!
//! A response is returned to its pool, together with its request, when the
//! handler has finished and the response is finished (ended, upgraded or
//! aborted). If the handler returns before the response is finished, the
//! release happens on the write that finishes it or on abort.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::string::FromUtf8Error;

use bytes::{Bytes, BytesMut};
use futures_util::FutureExt;
use http::StatusCode;
use rivet_core::callback::{Callback, Invocation};
use rivet_core::extension::{Extensible, Extensions};
use rivet_core::pool::{Poolable, Pooled};
use rivet_core::scheduler::{AbortGuard, TaskHandle};
use rivet_core::transport::{NativeResponse, Token, UpgradeContext};
use rivet_core::{RivetError, RivetResult};
use rivet_telemetry::metrics;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use crate::context::Shared;
use crate::cookie::{CookieOptions, PendingCookies, SetCookie};
use crate::error_handler::ErrorSource;
use crate::request::{Request, RequestState};

/// Streaming state of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// Nothing written yet.
    #[default]
    Idle,
    /// Body bytes are being written.
    Writing,
    /// A chunk hit backpressure; waiting for the socket to drain.
    WritableWait,
    /// The response is complete.
    Ended,
    /// The peer went away.
    Aborted,
}

type DataHandler = Rc<dyn Fn(&Response, &[u8], bool)>;
type WritableHandler = Rc<dyn Fn(&Response, u64) -> bool>;

struct PendingChunk {
    data: Bytes,
    total_size: u64,
    start_offset: u64,
    tx: oneshot::Sender<(bool, bool)>,
}

struct BodyCollector {
    buffer: BytesMut,
    tx: oneshot::Sender<Bytes>,
}

/// Per-request state of a pooled response wrapper.
#[derive(Default)]
pub struct ResponseState {
    native: Option<Rc<dyn NativeResponse>>,
    state: StreamState,
    aborted: bool,
    upgraded: bool,
    detached: bool,
    abort_registered: bool,
    data_registered: bool,
    writable_registered: bool,
    cookies: PendingCookies,
    pending_chunk: Option<PendingChunk>,
    collector: Option<BodyCollector>,
    on_data: Option<DataHandler>,
    on_writable: Option<WritableHandler>,
    on_aborted: Option<Callback<Response>>,
    task: Option<TaskHandle>,
    paired: Option<Pooled<RequestState>>,
    extensions: Extensions<Response>,
}

impl Poolable for ResponseState {
    type Native = dyn NativeResponse;
    type Handle = Response;

    fn detached() -> Self {
        Self::default()
    }

    fn bind(&mut self, native: Rc<dyn NativeResponse>) {
        self.native = Some(native);
    }

    fn reset(&mut self) {
        let extensions = std::mem::take(&mut self.extensions);
        *self = Self {
            extensions,
            ..Self::default()
        };
    }

    fn extensions_mut(&mut self) -> &mut Extensions<Response> {
        &mut self.extensions
    }
}

/// An HTTP response under construction.
///
/// Cheap to clone. Writes after an abort, or after the wrapper went back
/// to its pool, are silent no-ops.
#[derive(Clone)]
pub struct Response {
    handle: Pooled<ResponseState>,
    shared: Rc<Shared>,
}

impl Response {
    pub(crate) fn from_handle(handle: Pooled<ResponseState>, shared: Rc<Shared>) -> Self {
        Self { handle, shared }
    }

    pub(crate) fn resolve(shared: &Rc<Shared>, token: Token) -> Option<Self> {
        let handle = shared.responses.resolve(token)?;
        Some(Self::from_handle(handle, Rc::clone(shared)))
    }

    pub(crate) fn pair(&self, request: &Request) {
        self.handle
            .with_mut(|state| state.paired = Some(request.handle().clone()));
    }

    pub(crate) fn request(&self) -> Option<Request> {
        self.handle
            .with(|state| state.paired.clone())
            .flatten()
            .map(Request::from_handle)
    }

    pub(crate) fn store_task(&self, task: TaskHandle) {
        self.handle.with_mut(|state| state.task = Some(task));
    }

    /// Called by the dispatcher once the route handler has returned.
    pub(crate) fn finish_dispatch(&self) {
        if !self.handle.is_live() {
            return;
        }
        // A yielding handler hands the exchange to the next route, which
        // gets a fresh pair.
        let yielded = self.request().is_some_and(|req| req.get_yield());
        if yielded || self.is_finished() {
            self.release_pair();
        } else {
            self.handle.with_mut(|state| state.detached = true);
            self.grab_aborted_handler();
        }
    }

    fn is_finished(&self) -> bool {
        let Some((finished, native)) = self
            .handle
            .with(|state| (state.aborted || state.upgraded, state.native.clone()))
        else {
            return true;
        };
        finished || native.map_or(true, |n| n.has_responded())
    }

    fn release_if_detached(&self) {
        if self.handle.with(|state| state.detached).unwrap_or(false) {
            self.release_pair();
        }
    }

    fn release_pair(&self) {
        let paired = self.handle.with_mut(|state| state.paired.take()).flatten();
        if let Some(request) = paired {
            self.shared.requests.release(&request);
        }
        if self.shared.responses.release(&self.handle) {
            debug!(token = %self.token(), "response released");
        }
    }

    /// The native handle, unless aborted or released.
    fn live_native(&self) -> Option<Rc<dyn NativeResponse>> {
        self.handle
            .with(|state| {
                if state.aborted {
                    None
                } else {
                    state.native.clone()
                }
            })
            .flatten()
    }

    fn set_state(&self, next: StreamState) {
        self.handle.with_mut(|state| {
            if !matches!(state.state, StreamState::Aborted | StreamState::Ended) {
                state.state = next;
            }
        });
    }

    fn flush_cookies(&self, native: &dyn NativeResponse) {
        let values = self
            .handle
            .with_mut(|state| {
                if state.cookies.is_empty() {
                    Vec::new()
                } else {
                    state.cookies.take_header_values()
                }
            })
            .unwrap_or_default();
        for value in values {
            native.write_header("Set-Cookie", &value);
        }
    }

    fn report(&self, error: anyhow::Error) {
        self.shared
            .report(ErrorSource::Request, error, Some(self.clone()), self.request());
    }

    /// Engine token of this wrapper.
    pub fn token(&self) -> Token {
        self.handle.token()
    }

    /// `true` until the wrapper goes back to its pool.
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Current streaming state. Released wrappers report [`StreamState::Ended`].
    pub fn state(&self) -> StreamState {
        self.handle
            .with(|state| state.state)
            .unwrap_or(StreamState::Ended)
    }

    /// `true` once the peer has gone away.
    pub fn is_aborted(&self) -> bool {
        self.handle.with(|state| state.aborted).unwrap_or(false)
    }

    /// `true` once the response has been sent, or can no longer be.
    pub fn has_responded(&self) -> bool {
        self.is_finished()
    }

    /// Writes the status line, e.g. `200 OK`.
    pub fn write_status(&self, status: StatusCode) -> &Self {
        let text = match status.canonical_reason() {
            Some(reason) => format!("{} {}", status.as_u16(), reason),
            None => status.as_u16().to_string(),
        };
        self.write_status_text(&text)
    }

    /// Writes a status line verbatim.
    pub fn write_status_text(&self, status: &str) -> &Self {
        if let Some(native) = self.live_native() {
            self.shared.idle.mark_busy();
            native.write_status(status);
        }
        self
    }

    /// Writes a numeric status code.
    pub fn write_status_code(&self, code: u16) -> RivetResult<&Self> {
        let status = StatusCode::from_u16(code).map_err(|_| RivetError::InvalidStatus(code))?;
        Ok(self.write_status(status))
    }

    /// Writes one header. Pending cookies are written first.
    pub fn write_header(&self, name: &str, value: &str) -> &Self {
        if let Some(native) = self.live_native() {
            self.shared.idle.mark_busy();
            self.flush_cookies(&*native);
            native.write_header(name, value);
        }
        self
    }

    /// Writes one header with a numeric value.
    pub fn write_header_int(&self, name: &str, value: u64) -> &Self {
        if let Some(native) = self.live_native() {
            self.shared.idle.mark_busy();
            self.flush_cookies(&*native);
            native.write_header_int(name, value);
        }
        self
    }

    /// Queues a cookie, written with the next header or terminal write.
    pub fn set_cookie(&self, name: &str, value: &str, options: CookieOptions) -> &Self {
        self.handle.with_mut(|state| {
            if !state.aborted {
                state.cookies.set(SetCookie::new(name, value, options));
            }
        });
        self
    }

    /// Writes a body chunk with chunked transfer encoding.
    ///
    /// Returns `false` on backpressure or if the response can no longer be
    /// written.
    pub fn write(&self, chunk: impl AsRef<[u8]>) -> bool {
        let Some(native) = self.live_native() else {
            return false;
        };
        self.shared.idle.mark_busy();
        self.set_state(StreamState::Writing);
        native.write(chunk.as_ref())
    }

    /// Writes `body` and ends the response.
    pub fn end(&self, body: impl AsRef<[u8]>) -> &Self {
        self.end_with(body, false)
    }

    /// Writes `body`, ends the response and optionally closes the connection.
    pub fn end_with(&self, body: impl AsRef<[u8]>, close_connection: bool) -> &Self {
        if let Some(native) = self.live_native() {
            self.shared.idle.mark_busy();
            self.flush_cookies(&*native);
            native.end(body.as_ref(), close_connection);
            self.set_state(StreamState::Ended);
            self.release_if_detached();
        }
        self
    }

    /// Serializes `value` as JSON and ends the response with it.
    pub fn end_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<&Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        self.write_header("Content-Type", "application/json");
        Ok(self.end(body))
    }

    /// Ends the response without a body.
    pub fn end_without_body(&self, close_connection: bool) -> &Self {
        if let Some(native) = self.live_native() {
            self.shared.idle.mark_busy();
            self.flush_cookies(&*native);
            native.end_without_body(close_connection);
            self.set_state(StreamState::Ended);
            self.release_if_detached();
        }
        self
    }

    /// Writes status, content type, extra headers and body in one go.
    pub fn send(
        &self,
        body: impl AsRef<[u8]>,
        content_type: &str,
        status: StatusCode,
        headers: &[(&str, &str)],
    ) -> &Self {
        self.write_status(status);
        self.write_header("Content-Type", content_type);
        for (name, value) in headers {
            self.write_header(name, value);
        }
        self.end(body)
    }

    /// [`send`](Self::send) inside a cork.
    pub fn cork_send(
        &self,
        body: impl AsRef<[u8]>,
        content_type: &str,
        status: StatusCode,
        headers: &[(&str, &str)],
    ) -> &Self {
        self.cork(|res| {
            res.send(body, content_type, status, headers);
        })
    }

    /// [`end`](Self::end) inside a cork.
    pub fn cork_end(&self, body: impl AsRef<[u8]>) -> &Self {
        self.cork(|res| {
            res.end(body);
        })
    }

    /// Redirects with `302 Found`.
    pub fn redirect(&self, location: &str) -> &Self {
        self.redirect_with_status(location, StatusCode::FOUND)
    }

    /// Redirects with the given status.
    pub fn redirect_with_status(&self, location: &str, status: StatusCode) -> &Self {
        self.write_status(status);
        self.write_header("Location", location);
        self.end_without_body(false)
    }

    /// Attempts to write part of a body of `total_size` bytes.
    ///
    /// Returns `(ok, done)`. `ok == false` means backpressure: nothing past
    /// the engine's write offset was kept, so retry from there after the
    /// socket is writable. `done == true` means the whole body went out.
    /// An aborted response reports `(false, true)`.
    pub fn try_end(&self, chunk: &[u8], total_size: u64, close_connection: bool) -> (bool, bool) {
        let Some(native) = self.live_native() else {
            return (false, true);
        };
        self.shared.idle.mark_busy();
        self.flush_cookies(&*native);
        let (ok, done) = native.try_end(chunk, total_size, close_connection);
        self.set_state(if done {
            StreamState::Ended
        } else if ok {
            StreamState::Writing
        } else {
            StreamState::WritableWait
        });
        if done {
            self.release_if_detached();
        }
        (ok, done)
    }

    /// Sends one chunk of a body of `total_size` bytes, waiting out
    /// backpressure.
    ///
    /// Resolves to the `(ok, done)` of the attempt that completed the
    /// chunk, or `(false, true)` if the peer went away first.
    pub async fn send_chunk(&self, chunk: impl Into<Bytes>, total_size: u64) -> (bool, bool) {
        let data = chunk.into();
        if self.live_native().is_none() {
            return (false, true);
        }
        let start_offset = self.get_write_offset();
        let (ok, done) = self.try_end(&data, total_size, false);
        if ok || done {
            return (ok, done);
        }

        let (tx, rx) = oneshot::channel();
        let register = self.handle.with_mut(|state| {
            state.pending_chunk = Some(PendingChunk {
                data,
                total_size,
                start_offset,
                tx,
            });
            !std::mem::replace(&mut state.writable_registered, true)
        });
        match register {
            None => return (false, true),
            Some(true) => {
                if let Some(native) = self.live_native() {
                    native.on_writable(self.token());
                }
            }
            Some(false) => {}
        }
        self.grab_aborted_handler();
        rx.await.unwrap_or((false, true))
    }

    /// Handles a writable notification from the engine.
    pub(crate) fn handle_writable(&self, offset: u64) -> bool {
        let pending = self.handle.with_mut(|state| state.pending_chunk.take()).flatten();
        match pending {
            Some(chunk) => {
                let written = offset.saturating_sub(chunk.start_offset);
                let start = usize::try_from(written)
                    .unwrap_or(usize::MAX)
                    .min(chunk.data.len());
                let (ok, done) = self.try_end(&chunk.data[start..], chunk.total_size, false);
                if ok || done {
                    let _ = chunk.tx.send((ok, done));
                    true
                } else {
                    self.handle
                        .with_mut(|state| state.pending_chunk = Some(chunk));
                    false
                }
            }
            None => {
                let handler = self.handle.with(|state| state.on_writable.clone()).flatten();
                handler.map_or(true, |handler| handler(self, offset))
            }
        }
    }

    /// Handles a body chunk from the engine.
    pub(crate) fn handle_data(&self, chunk: &[u8], is_end: bool) {
        let Some((finished, handler)) = self.handle.with_mut(|state| {
            if let Some(collector) = state.collector.as_mut() {
                collector.buffer.extend_from_slice(chunk);
            }
            let finished = if is_end { state.collector.take() } else { None };
            (finished, state.on_data.clone())
        }) else {
            return;
        };
        if let Some(collector) = finished {
            let _ = collector.tx.send(collector.buffer.freeze());
        }
        if let Some(handler) = handler {
            handler(self, chunk, is_end);
        }
    }

    /// Handles the peer going away. Runs at most once.
    pub(crate) fn abort(&self) {
        let Some(taken) = self.handle.with_mut(|state| {
            if state.aborted {
                return None;
            }
            state.aborted = true;
            state.state = StreamState::Aborted;
            state.native = None;
            state.on_data = None;
            state.on_writable = None;
            Some((
                state.pending_chunk.take(),
                state.collector.take(),
                state.on_aborted.take(),
                state.detached,
            ))
        }) else {
            return;
        };
        let Some((chunk, collector, handler, detached)) = taken else {
            return;
        };

        metrics::record_abort();
        debug!(token = %self.token(), detached, "response aborted");

        if let Some(chunk) = chunk {
            let _ = chunk.tx.send((false, true));
        }
        if let Some(collector) = collector {
            let _ = collector.tx.send(collector.buffer.freeze());
        }

        let Some(handler) = handler else {
            if detached {
                self.release_pair();
            }
            return;
        };
        match handler.invoke(self.clone()) {
            Invocation::Done(result) => {
                if let Err(e) = result {
                    self.report(e);
                }
                if detached {
                    self.release_pair();
                }
            }
            Invocation::Pending(fut) => {
                let res = self.clone();
                self.shared.spawn(
                    async move {
                        if let Err(e) = fut.await {
                            res.report(e);
                        }
                        if detached {
                            res.release_pair();
                        }
                    }
                    .boxed_local(),
                );
            }
        }
    }

    /// Registers a handler for the peer going away.
    pub fn on_aborted(&self, handler: Callback<Response>) -> &Self {
        self.handle.with_mut(|state| {
            if !state.aborted {
                state.on_aborted = Some(handler);
            }
        });
        self.grab_aborted_handler();
        self
    }

    /// Registers a handler for raw request body chunks.
    pub fn on_data<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Response, &[u8], bool) + 'static,
    {
        let register = self.handle.with_mut(|state| {
            state.on_data = Some(Rc::new(handler));
            !std::mem::replace(&mut state.data_registered, true)
        });
        if register == Some(true) {
            if let Some(native) = self.live_native() {
                native.on_data(self.token());
            }
        }
        self
    }

    /// Registers a handler for writable notifications. Return `false` to
    /// be called again.
    ///
    /// A pending [`send_chunk`](Self::send_chunk) takes precedence.
    pub fn on_writable<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Response, u64) -> bool + 'static,
    {
        let register = self.handle.with_mut(|state| {
            state.on_writable = Some(Rc::new(handler));
            !std::mem::replace(&mut state.writable_registered, true)
        });
        if register == Some(true) {
            if let Some(native) = self.live_native() {
                native.on_writable(self.token());
            }
        }
        self
    }

    /// Reads the whole request body.
    ///
    /// On abort, resolves with whatever was received so far.
    pub async fn get_data(&self) -> Bytes {
        let (tx, rx) = oneshot::channel();
        let register = self
            .handle
            .with_mut(|state| {
                if state.aborted {
                    return None;
                }
                state.collector = Some(BodyCollector {
                    buffer: BytesMut::new(),
                    tx,
                });
                Some(!std::mem::replace(&mut state.data_registered, true))
            })
            .flatten();
        match register {
            None => return Bytes::new(),
            Some(true) => {
                if let Some(native) = self.live_native() {
                    native.on_data(self.token());
                }
            }
            Some(false) => {}
        }
        self.grab_aborted_handler();
        rx.await.unwrap_or_default()
    }

    /// Reads the request body as UTF-8 text.
    pub async fn get_text(&self) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.get_data().await.to_vec())
    }

    /// Reads the request body as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.get_data().await)
    }

    /// Reads an `application/x-www-form-urlencoded` body. The last value of
    /// a repeated key wins.
    pub async fn get_form_urlencoded(
        &self,
    ) -> Result<HashMap<String, String>, serde_urlencoded::de::Error> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&self.get_data().await)?;
        Ok(pairs.into_iter().collect())
    }

    /// Runs `scope` with every write batched into one network send.
    pub fn cork<F: FnOnce(&Response)>(&self, scope: F) -> &Self {
        let Some(native) = self.live_native() else {
            return self;
        };
        let mut scope = Some(scope);
        native.cork(&mut || {
            if let Some(scope) = scope.take() {
                scope(self);
            }
        });
        self
    }

    /// Corks a dynamically supplied callback.
    ///
    /// Task callbacks are rejected before anything is written. An error
    /// returned by a synchronous callback goes to the error pipeline.
    pub fn cork_callback(&self, callback: &Callback<Response>) -> RivetResult<&Self> {
        let f = match callback {
            Callback::Sync(f) => Rc::clone(f),
            Callback::Task(_) => return Err(RivetError::SuspendInCork),
        };
        let mut failure = None;
        self.cork(|res| failure = f(res.clone()).err());
        if let Some(e) = failure {
            self.report(e);
        }
        Ok(self)
    }

    /// Stops reading from the peer.
    pub fn pause(&self) -> &Self {
        if let Some(native) = self.live_native() {
            native.pause();
        }
        self
    }

    /// Resumes reading from the peer.
    pub fn resume(&self) -> &Self {
        if let Some(native) = self.live_native() {
            self.shared.idle.mark_busy();
            native.resume();
        }
        self
    }

    /// Sends `100 Continue`.
    pub fn write_continue(&self) -> &Self {
        if let Some(native) = self.live_native() {
            self.shared.idle.mark_busy();
            native.write_continue();
        }
        self
    }

    /// Closes the connection immediately.
    pub fn close(&self) -> &Self {
        if let Some(native) = self.live_native() {
            self.shared.idle.mark_busy();
            native.close();
        }
        self
    }

    /// Bytes of body written so far. Zero once aborted.
    pub fn get_write_offset(&self) -> u64 {
        self.live_native().map_or(0, |n| n.write_offset())
    }

    /// Overrides the engine's write offset.
    pub fn override_write_offset(&self, offset: u64) -> &Self {
        if let Some(native) = self.live_native() {
            native.override_write_offset(offset);
        }
        self
    }

    /// Peer address.
    pub fn remote_address(&self) -> Option<String> {
        self.live_native()?.remote_address()
    }

    /// Peer address reported by a proxy protocol header.
    pub fn proxied_remote_address(&self) -> Option<String> {
        self.live_native()?.proxied_remote_address()
    }

    /// Accepts a WebSocket upgrade without user data.
    pub fn upgrade(
        &self,
        key: &str,
        protocol: &str,
        extensions: &str,
        context: UpgradeContext,
    ) -> &Self {
        if let Some(native) = self.live_native() {
            self.finish_upgrade(&*native, None, key, protocol, extensions, context);
        }
        self
    }

    /// Accepts a WebSocket upgrade, attaching `user_data` to the connection.
    ///
    /// The data is available from
    /// [`Connection::get_user_data`](rivet_ws::Connection::get_user_data)
    /// until the connection closes.
    pub fn upgrade_with<T: 'static>(
        &self,
        user_data: T,
        key: &str,
        protocol: &str,
        extensions: &str,
        context: UpgradeContext,
    ) -> &Self {
        if let Some(native) = self.live_native() {
            let id = self.shared.user_data().insert(Rc::new(user_data));
            self.finish_upgrade(&*native, Some(id), key, protocol, extensions, context);
        }
        self
    }

    fn finish_upgrade(
        &self,
        native: &dyn NativeResponse,
        user_data: Option<uuid::Uuid>,
        key: &str,
        protocol: &str,
        extensions: &str,
        context: UpgradeContext,
    ) {
        self.shared.idle.mark_busy();
        native.upgrade(user_data, key, protocol, extensions, context);
        self.handle.with_mut(|state| {
            state.upgraded = true;
            state.state = StreamState::Ended;
        });
        self.release_if_detached();
    }
}

impl AbortGuard for Response {
    fn grab_aborted_handler(&self) {
        let native = self
            .handle
            .with_mut(|state| {
                if state.aborted || state.abort_registered {
                    None
                } else {
                    state.abort_registered = true;
                    state.native.clone()
                }
            })
            .flatten();
        if let Some(native) = native {
            native.on_aborted(self.token());
        }
    }
}

impl Extensible for Response {
    fn with_extensions<R>(&self, f: impl FnOnce(&mut Extensions<Self>) -> R) -> Option<R> {
        self.handle.with_mut(|state| f(&mut state.extensions))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("token", &self.token())
            .field("state", &self.state())
            .field("live", &self.is_live())
            .finish()
    }
}
