//! Client side of the loopback engine.
//!
//! Requests and WebSocket frames built here are queued on the engine and
//! reach the server on its next poll. Results are read back from the
//! shared [`Exchange`] record, so a test drives the app and inspects the
//! response without any I/O:
//!
//! ```ignore
//! let res = engine.get("/users/42").send();
//! app.poll_once();
//! res.assert_status_code(200).assert_body_eq("42");
//! ```

use std::rc::{Rc, Weak};

use bytes::Bytes;
use http::StatusCode;
use rivet_core::transport::OpCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::engine::{Event, LoopbackEngine};
use crate::exchange::{Exchange, LoopbackRequest, RequestData, ResponseRecord, UpgradeRecord};
use crate::socket::LoopbackSocket;

/// Key sent with every WebSocket upgrade request.
pub const TEST_WEBSOCKET_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// Builder for a request against a [`LoopbackEngine`].
#[must_use]
pub struct RequestBuilder {
    engine: Weak<LoopbackEngine>,
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Vec<Bytes>,
    streaming: bool,
    send_buffer: Option<Option<u64>>,
    ancient: bool,
    remote_address: String,
}

impl RequestBuilder {
    pub(crate) fn new(engine: Weak<LoopbackEngine>, method: &str, url: &str) -> Self {
        Self {
            engine,
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            streaming: false,
            send_buffer: None,
            ancient: false,
            remote_address: "127.0.0.1".to_string(),
        }
    }

    /// Adds a header. Names are lower-cased, as a native engine sees them.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.headers.push((
            name.as_ref().to_ascii_lowercase(),
            value.as_ref().to_string(),
        ));
        self
    }

    /// Sets the `Content-Type` header.
    pub fn content_type(self, content_type: impl AsRef<str>) -> Self {
        self.header("content-type", content_type)
    }

    /// Appends a body chunk. Chunks are delivered separately.
    pub fn body(mut self, chunk: impl Into<Bytes>) -> Self {
        self.body.push(chunk.into());
        self
    }

    /// Serializes `value` as a JSON body.
    pub fn json<T: Serialize>(self, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        self.content_type("application/json").body(body)
    }

    /// Leaves the body open. More arrives through
    /// [`LoopbackResponse::push_body`].
    pub fn streaming_body(mut self) -> Self {
        self.streaming = true;
        self
    }

    /// Bytes the response can send before writes report backpressure.
    pub fn send_buffer(mut self, capacity: u64) -> Self {
        self.send_buffer = Some(Some(capacity));
        self
    }

    /// Marks the request as HTTP/1.0.
    pub fn ancient(mut self) -> Self {
        self.ancient = true;
        self
    }

    /// Sets the peer address.
    pub fn remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = address.into();
        self
    }

    /// Queues the request. It is dispatched on the engine's next poll.
    ///
    /// If the engine is not listening the response is marked refused and
    /// nothing is queued.
    pub fn send(self) -> LoopbackResponse {
        let engine = self.engine.upgrade();
        let id = engine.as_ref().map_or(0, |e| e.next_id());
        let capacity = match self.send_buffer {
            Some(capacity) => capacity,
            None => engine.as_ref().and_then(|e| e.default_send_buffer()),
        };
        let (path, query) = match self.url.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (self.url.clone(), String::new()),
        };
        let request = LoopbackRequest::new(RequestData {
            method: self.method,
            url: path,
            query,
            headers: self.headers,
            params: Vec::new(),
            yield_to_next: false,
            ancient: self.ancient,
            valid: false,
        });
        let exchange = Exchange::new(
            id,
            engine.as_ref().map_or_else(Weak::new, |e| e.weak()),
            request,
            self.body,
            !self.streaming,
            capacity,
            self.remote_address,
        );

        match engine {
            Some(engine) if engine.is_listening() => {
                engine.enqueue_all(vec![Event::Request(Rc::clone(&exchange))]);
            }
            _ => {
                let mut state = exchange.state.borrow_mut();
                state.record.refused = true;
                state.record.closed = true;
            }
        }
        LoopbackResponse { exchange }
    }

    /// Sends the request as a WebSocket upgrade.
    pub fn websocket(self) -> ClientSocket {
        let response = self
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .header("sec-websocket-key", TEST_WEBSOCKET_KEY)
            .header("sec-websocket-version", "13")
            .send();
        ClientSocket { response }
    }
}

/// The client's view of one response.
#[derive(Clone)]
pub struct LoopbackResponse {
    exchange: Rc<Exchange>,
}

impl LoopbackResponse {
    /// Everything written so far.
    pub fn record(&self) -> ResponseRecord {
        self.exchange.record()
    }

    /// Status line, if one was written.
    pub fn status(&self) -> Option<String> {
        self.exchange.state.borrow().record.status.clone()
    }

    /// Numeric status code, if one was written.
    pub fn status_code(&self) -> Option<u16> {
        self.status()
            .and_then(|line| line.split_whitespace().next().map(str::to_string))
            .and_then(|code| code.parse::<StatusCode>().ok())
            .map(|code| code.as_u16())
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<String> {
        self.header_values(name).into_iter().next()
    }

    /// Every value of a header, in write order.
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.exchange
            .state
            .borrow()
            .record
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Every header, in write order.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.exchange.state.borrow().record.headers.clone()
    }

    /// Body bytes received so far.
    pub fn body(&self) -> Bytes {
        Bytes::from(self.exchange.state.borrow().record.body.clone())
    }

    /// Body as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.exchange.state.borrow().record.body).into_owned()
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.exchange.state.borrow().record.body)
    }

    /// The response was ended.
    pub fn is_ended(&self) -> bool {
        self.exchange.state.borrow().record.ended
    }

    /// The connection was closed.
    pub fn is_closed(&self) -> bool {
        self.exchange.state.borrow().record.closed
    }

    /// The client aborted the request, or the server closed it unfinished.
    pub fn is_aborted(&self) -> bool {
        self.exchange.state.borrow().record.aborted
    }

    /// The engine was not listening.
    pub fn is_refused(&self) -> bool {
        self.exchange.state.borrow().record.refused
    }

    /// The server paused reading.
    pub fn is_paused(&self) -> bool {
        self.exchange.state.borrow().record.paused
    }

    /// The server sent `100 Continue`.
    pub fn continue_sent(&self) -> bool {
        self.exchange.state.borrow().record.continue_sent
    }

    /// Network sends so far.
    pub fn flushes(&self) -> usize {
        self.exchange.state.borrow().record.flushes
    }

    /// Body bytes the server has written.
    pub fn write_offset(&self) -> u64 {
        self.exchange.state.borrow().record.write_offset
    }

    /// Upgrade details, once accepted.
    pub fn upgrade(&self) -> Option<UpgradeRecord> {
        self.exchange.state.borrow().record.upgrade.clone()
    }

    /// Sends another body chunk of a streaming request.
    pub fn push_body(&self, chunk: impl Into<Bytes>, end: bool) {
        self.exchange.push_body(chunk.into(), end);
    }

    /// Disconnects before the response finished.
    pub fn abort(&self) {
        self.exchange.abort();
    }

    /// Frees `bytes` of send buffer and wakes a waiting writer.
    pub fn drain(&self, bytes: u64) {
        self.exchange.drain(Some(bytes));
    }

    /// Removes the send buffer limit and wakes a waiting writer.
    pub fn drain_all(&self) {
        self.exchange.drain(None);
    }

    /// Panics unless the status code is `expected`.
    #[track_caller]
    pub fn assert_status_code(&self, expected: u16) -> &Self {
        assert_eq!(
            self.status_code(),
            Some(expected),
            "unexpected status line {:?}",
            self.status()
        );
        self
    }

    /// Panics unless header `name` has value `expected`.
    #[track_caller]
    pub fn assert_header(&self, name: &str, expected: &str) -> &Self {
        assert_eq!(
            self.header(name).as_deref(),
            Some(expected),
            "header {name:?} mismatch"
        );
        self
    }

    /// Panics unless the body is exactly `expected`.
    #[track_caller]
    pub fn assert_body_eq(&self, expected: impl AsRef<str>) -> &Self {
        assert_eq!(self.text(), expected.as_ref(), "body mismatch");
        self
    }
}

impl std::fmt::Debug for LoopbackResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackResponse")
            .field("id", &self.exchange.id)
            .field("record", &self.exchange.state.borrow().record)
            .finish()
    }
}

/// Client end of a WebSocket connection.
#[derive(Clone, Debug)]
pub struct ClientSocket {
    response: LoopbackResponse,
}

impl ClientSocket {
    /// The upgrade response.
    pub fn response(&self) -> &LoopbackResponse {
        &self.response
    }

    fn socket(&self) -> Option<Rc<LoopbackSocket>> {
        self.response.exchange.socket.borrow().clone()
    }

    fn enqueue(&self, make: impl FnOnce(Rc<LoopbackSocket>) -> Event) -> bool {
        match (self.socket(), self.engine()) {
            (Some(socket), Some(engine)) if socket.is_open() => {
                engine.enqueue_all(vec![make(socket)]);
                true
            }
            _ => false,
        }
    }

    fn engine(&self) -> Option<Rc<LoopbackEngine>> {
        self.socket().and_then(|s| s.engine_handle())
    }

    /// `true` once upgraded and until either side closes.
    pub fn is_open(&self) -> bool {
        self.socket().is_some_and(|s| s.is_open())
    }

    /// Association key of the connection's user data.
    pub fn user_data(&self) -> Option<Uuid> {
        self.response.upgrade().and_then(|u| u.user_data)
    }

    /// Sends a text message. Returns `false` if the socket is not open.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let payload = Bytes::from(text.into());
        self.enqueue(|socket| Event::WsMessage {
            socket,
            payload,
            opcode: OpCode::Text,
        })
    }

    /// Sends a binary message.
    pub fn send_binary(&self, payload: impl Into<Bytes>) -> bool {
        let payload = payload.into();
        self.enqueue(|socket| Event::WsMessage {
            socket,
            payload,
            opcode: OpCode::Binary,
        })
    }

    /// Sends a ping.
    pub fn ping(&self, payload: impl Into<Bytes>) -> bool {
        let payload = payload.into();
        self.enqueue(|socket| Event::WsPing(socket, payload))
    }

    /// Sends a pong.
    pub fn pong(&self, payload: impl Into<Bytes>) -> bool {
        let payload = payload.into();
        self.enqueue(|socket| Event::WsPong(socket, payload))
    }

    /// Closes the connection from the client side.
    pub fn close(&self, code: u16, reason: &str) {
        if let Some(socket) = self.socket() {
            socket.shut(code, Bytes::copy_from_slice(reason.as_bytes()));
        }
    }

    /// Messages the server delivered, oldest first.
    pub fn received(&self) -> Vec<(Bytes, OpCode)> {
        self.socket()
            .map(|s| s.state.borrow().received.clone())
            .unwrap_or_default()
    }

    /// Delivered messages as lossy UTF-8.
    pub fn received_text(&self) -> Vec<String> {
        self.received()
            .iter()
            .map(|(payload, _)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    /// Takes the delivered messages, leaving none.
    pub fn take_received(&self) -> Vec<(Bytes, OpCode)> {
        self.socket()
            .map(|s| std::mem::take(&mut s.state.borrow_mut().received))
            .unwrap_or_default()
    }

    /// Close code and reason, once closed.
    pub fn close_info(&self) -> Option<(u16, String)> {
        self.socket().and_then(|s| {
            s.state
                .borrow()
                .closed
                .as_ref()
                .map(|(code, reason)| (*code, String::from_utf8_lossy(reason).into_owned()))
        })
    }

    /// Topics the server subscribed this connection to.
    pub fn topics(&self) -> Vec<String> {
        self.socket()
            .map(|s| s.state.borrow().topics.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Stops reading. Later sends buffer and report backpressure.
    pub fn stall(&self) {
        if let Some(socket) = self.socket() {
            socket.stall();
        }
    }

    /// Reads everything buffered and lets the server know.
    pub fn drain(&self) {
        if let Some(socket) = self.socket() {
            socket.drain();
        }
    }

    /// Network sends the server made on this connection.
    pub fn flushes(&self) -> usize {
        self.socket().map_or(0, |s| s.state.borrow().flushes)
    }
}

