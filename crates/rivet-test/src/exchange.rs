//! Native request and response handles of the loopback engine.
//!
//! An [`Exchange`] is one HTTP request/response pair. It implements
//! [`NativeResponse`] and records everything written to it in a
//! [`ResponseRecord`] the test can inspect.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use rivet_core::transport::{
    NativeRequest, NativeResponse, RouteId, Token, UpgradeContext, WsRouteOptions,
};
use uuid::Uuid;

use crate::engine::{Event, LoopbackEngine};
use crate::socket::LoopbackSocket;

/// Details of an accepted WebSocket upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRecord {
    /// `Sec-WebSocket-Key` the server echoed.
    pub key: String,
    /// Negotiated subprotocol.
    pub protocol: String,
    /// Negotiated extensions.
    pub extensions: String,
    /// Association key of the connection's user data.
    pub user_data: Option<Uuid>,
}

/// Everything the server wrote to one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseRecord {
    /// Status line text, e.g. `200 OK`.
    pub status: Option<String>,
    /// Headers in write order.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
    /// The response was ended.
    pub ended: bool,
    /// The connection was closed.
    pub closed: bool,
    /// The client went away first.
    pub aborted: bool,
    /// No socket was listening when the request was sent.
    pub refused: bool,
    /// The server stopped reading.
    pub paused: bool,
    /// `100 Continue` was sent.
    pub continue_sent: bool,
    /// Network sends; writes inside one cork count once.
    pub flushes: usize,
    /// Body bytes written.
    pub write_offset: u64,
    /// Set once the request was upgraded.
    pub upgrade: Option<UpgradeRecord>,
}

pub(crate) struct RequestData {
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) query: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) params: Vec<String>,
    pub(crate) yield_to_next: bool,
    pub(crate) ancient: bool,
    pub(crate) valid: bool,
}

/// The request half. Readable only while the handler's synchronous part
/// runs, like a native engine's stack-allocated request.
pub(crate) struct LoopbackRequest {
    data: RefCell<RequestData>,
}

impl LoopbackRequest {
    pub(crate) fn new(data: RequestData) -> Self {
        Self {
            data: RefCell::new(data),
        }
    }

    pub(crate) fn prepare(&self, params: Vec<String>) {
        let mut data = self.data.borrow_mut();
        data.params = params;
        data.yield_to_next = false;
        data.valid = true;
    }

    pub(crate) fn expire(&self) {
        self.data.borrow_mut().valid = false;
    }

    pub(crate) fn method_and_url(&self) -> (String, String) {
        let data = self.data.borrow();
        (data.method.clone(), data.url.clone())
    }

    pub(crate) fn wants_upgrade(&self) -> bool {
        self.data
            .borrow()
            .headers
            .iter()
            .any(|(name, value)| name == "upgrade" && value.eq_ignore_ascii_case("websocket"))
    }

    fn read<T: Default>(&self, f: impl FnOnce(&RequestData) -> T) -> T {
        let data = self.data.borrow();
        if data.valid {
            f(&data)
        } else {
            T::default()
        }
    }
}

impl NativeRequest for LoopbackRequest {
    fn method(&self) -> String {
        self.read(|d| d.method.clone())
    }

    fn url(&self) -> String {
        self.read(|d| d.url.clone())
    }

    fn query_string(&self) -> String {
        self.read(|d| d.query.clone())
    }

    fn query(&self, key: &str) -> Option<String> {
        self.read(|d| {
            serde_urlencoded::from_str::<Vec<(String, String)>>(&d.query)
                .ok()?
                .into_iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v)
        })
    }

    fn parameter(&self, index: usize) -> Option<String> {
        self.read(|d| d.params.get(index).cloned())
    }

    fn header(&self, name: &str) -> Option<String> {
        self.read(|d| {
            d.headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        })
    }

    fn for_each_header(&self, visit: &mut dyn FnMut(&str, &str)) {
        let headers = self.read(|d| d.headers.clone());
        for (name, value) in &headers {
            visit(name, value);
        }
    }

    fn set_yield(&self, yield_to_next: bool) {
        self.data.borrow_mut().yield_to_next = yield_to_next;
    }

    fn get_yield(&self) -> bool {
        self.data.borrow().yield_to_next
    }

    fn is_ancient(&self) -> bool {
        self.read(|d| d.ancient)
    }
}

#[derive(Default)]
pub(crate) struct ExchangeState {
    pub(crate) record: ResponseRecord,
    pub(crate) capacity: Option<u64>,
    cork_depth: u32,
    cork_dirty: bool,
    pub(crate) abort_token: Option<Token>,
    pub(crate) writable_token: Option<Token>,
    data_token: Option<Token>,
    body: VecDeque<Bytes>,
    body_complete: bool,
    body_end_sent: bool,
    pub(crate) route: Option<(RouteId, WsRouteOptions)>,
    pub(crate) remote_address: String,
    pub(crate) proxied_address: Option<String>,
}

impl ExchangeState {
    fn sent(&mut self) {
        if self.cork_depth > 0 {
            self.cork_dirty = true;
        } else {
            self.record.flushes += 1;
        }
    }

    fn ensure_status(&mut self) {
        if self.record.status.is_none() {
            self.record.status = Some("200 OK".to_string());
        }
    }

    fn is_open(&self) -> bool {
        !(self.record.aborted
            || self.record.ended
            || self.record.closed
            || self.record.upgrade.is_some())
    }
}

/// One HTTP request/response pair.
pub struct Exchange {
    pub(crate) id: u64,
    me: Weak<Exchange>,
    pub(crate) state: RefCell<ExchangeState>,
    pub(crate) request: Rc<LoopbackRequest>,
    pub(crate) socket: RefCell<Option<Rc<LoopbackSocket>>>,
    engine: Weak<LoopbackEngine>,
}

impl Exchange {
    pub(crate) fn new(
        id: u64,
        engine: Weak<LoopbackEngine>,
        request: LoopbackRequest,
        body: Vec<Bytes>,
        body_complete: bool,
        capacity: Option<u64>,
        remote_address: String,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            state: RefCell::new(ExchangeState {
                capacity,
                body: body.into_iter().collect(),
                body_complete,
                remote_address,
                ..ExchangeState::default()
            }),
            request: Rc::new(request),
            socket: RefCell::new(None),
            engine,
        })
    }

    fn enqueue(&self, events: Vec<Event>) {
        if let Some(engine) = self.engine.upgrade() {
            engine.enqueue_all(events);
        }
    }

    /// Hands buffered body chunks to the engine queue once the server has
    /// asked for them.
    fn flush_body(&self) {
        let events = {
            let mut state = self.state.borrow_mut();
            let Some(token) = state.data_token else {
                return;
            };
            if state.body_end_sent || state.record.aborted {
                return;
            }
            let mut chunks: Vec<Bytes> = state.body.drain(..).collect();
            let complete = state.body_complete;
            if complete && chunks.is_empty() {
                chunks.push(Bytes::new());
            }
            state.body_end_sent = complete;
            let last = chunks.len().saturating_sub(1);
            chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| Event::Data {
                    token,
                    chunk,
                    end: complete && i == last,
                })
                .collect::<Vec<_>>()
        };
        self.enqueue(events);
    }

    pub(crate) fn push_body(&self, chunk: Bytes, end: bool) {
        {
            let mut state = self.state.borrow_mut();
            if state.body_complete {
                return;
            }
            if !chunk.is_empty() {
                state.body.push_back(chunk);
            }
            state.body_complete = end;
        }
        self.flush_body();
    }

    /// The client goes away. The abort event is delivered on the next poll.
    pub(crate) fn abort(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.record.aborted || state.record.ended || state.record.upgrade.is_some() {
                return;
            }
            state.record.aborted = true;
            state.record.closed = true;
        }
        if let Some(me) = self.me.upgrade() {
            self.enqueue(vec![Event::Aborted(me)]);
        }
    }

    pub(crate) fn drain(&self, bytes: Option<u64>) {
        let wake = {
            let mut state = self.state.borrow_mut();
            state.capacity = match (state.capacity, bytes) {
                (Some(capacity), Some(bytes)) => Some(capacity.saturating_add(bytes)),
                _ => None,
            };
            state.writable_token.is_some() && state.is_open()
        };
        if let (true, Some(me)) = (wake, self.me.upgrade()) {
            self.enqueue(vec![Event::Writable(me)]);
        }
    }

    pub(crate) fn record(&self) -> ResponseRecord {
        self.state.borrow().record.clone()
    }

    /// Takes up to the free send-buffer space of `len` bytes.
    fn reserve(state: &mut ExchangeState, len: u64) -> u64 {
        match state.capacity.as_mut() {
            None => len,
            Some(capacity) => {
                let taken = len.min(*capacity);
                *capacity -= taken;
                taken
            }
        }
    }
}

impl NativeResponse for Exchange {
    fn write_status(&self, status: &str) {
        let mut state = self.state.borrow_mut();
        if state.is_open() && state.record.status.is_none() {
            state.record.status = Some(status.to_string());
        }
    }

    fn write_header(&self, name: &str, value: &str) {
        let mut state = self.state.borrow_mut();
        if state.is_open() {
            state.ensure_status();
            state.record.headers.push((name.to_string(), value.to_string()));
        }
    }

    fn write_header_int(&self, name: &str, value: u64) {
        self.write_header(name, &value.to_string());
    }

    fn write(&self, chunk: &[u8]) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.is_open() {
            return false;
        }
        state.ensure_status();
        let len = chunk.len() as u64;
        let fits = Self::reserve(&mut state, len) == len;
        state.record.body.extend_from_slice(chunk);
        state.record.write_offset += len;
        state.sent();
        fits
    }

    fn end(&self, body: &[u8], close_connection: bool) {
        let mut state = self.state.borrow_mut();
        if !state.is_open() {
            return;
        }
        state.ensure_status();
        state.record.body.extend_from_slice(body);
        state.record.write_offset += body.len() as u64;
        state.record.ended = true;
        state.record.closed |= close_connection;
        state.sent();
    }

    fn end_without_body(&self, close_connection: bool) {
        self.end(&[], close_connection);
    }

    fn try_end(&self, chunk: &[u8], total_size: u64, close_connection: bool) -> (bool, bool) {
        let mut state = self.state.borrow_mut();
        if state.record.aborted {
            return (false, true);
        }
        if !state.is_open() {
            return (true, true);
        }
        state.ensure_status();
        let len = chunk.len() as u64;
        let taken = Self::reserve(&mut state, len);
        let taken_bytes = usize::try_from(taken).unwrap_or(chunk.len());
        state.record.body.extend_from_slice(&chunk[..taken_bytes]);
        state.record.write_offset += taken;
        let done = state.record.write_offset >= total_size;
        if done {
            state.record.ended = true;
            state.record.closed |= close_connection;
        }
        if taken > 0 || done {
            state.sent();
        }
        (taken == len, done)
    }

    fn write_offset(&self) -> u64 {
        self.state.borrow().record.write_offset
    }

    fn override_write_offset(&self, offset: u64) {
        self.state.borrow_mut().record.write_offset = offset;
    }

    fn has_responded(&self) -> bool {
        let state = self.state.borrow();
        state.record.ended || state.record.upgrade.is_some()
    }

    fn cork(&self, scope: &mut dyn FnMut()) {
        self.state.borrow_mut().cork_depth += 1;
        scope();
        let mut state = self.state.borrow_mut();
        state.cork_depth -= 1;
        if state.cork_depth == 0 && std::mem::take(&mut state.cork_dirty) {
            state.record.flushes += 1;
        }
    }

    fn pause(&self) {
        self.state.borrow_mut().record.paused = true;
    }

    fn resume(&self) {
        self.state.borrow_mut().record.paused = false;
    }

    fn write_continue(&self) {
        self.state.borrow_mut().record.continue_sent = true;
    }

    fn close(&self) {
        let unfinished = {
            let mut state = self.state.borrow_mut();
            let unfinished = state.is_open();
            state.record.closed = true;
            unfinished
        };
        // Closing an unfinished response looks like a peer abort.
        if unfinished {
            self.state.borrow_mut().record.closed = false;
            self.abort();
        }
    }

    fn remote_address(&self) -> Option<String> {
        Some(self.state.borrow().remote_address.clone())
    }

    fn proxied_remote_address(&self) -> Option<String> {
        self.state.borrow().proxied_address.clone()
    }

    fn on_aborted(&self, token: Token) {
        self.state.borrow_mut().abort_token = Some(token);
    }

    fn on_data(&self, token: Token) {
        self.state.borrow_mut().data_token = Some(token);
        self.flush_body();
    }

    fn on_writable(&self, token: Token) {
        self.state.borrow_mut().writable_token = Some(token);
    }

    fn upgrade(
        &self,
        user_data: Option<Uuid>,
        key: &str,
        protocol: &str,
        extensions: &str,
        context: UpgradeContext,
    ) {
        let (route, remote) = {
            let mut state = self.state.borrow_mut();
            if !state.is_open() || context.raw() != self.id {
                return;
            }
            let Some(route) = state.route.clone() else {
                return;
            };
            state.record.status = Some("101 Switching Protocols".to_string());
            state.record.upgrade = Some(UpgradeRecord {
                key: key.to_string(),
                protocol: protocol.to_string(),
                extensions: extensions.to_string(),
                user_data,
            });
            state.sent();
            (route, state.remote_address.clone())
        };
        if let Some(engine) = self.engine.upgrade() {
            let socket = engine.open_socket(route, user_data, remote);
            *self.socket.borrow_mut() = Some(socket);
        }
    }
}
