//! The in-process engine.
//!
//! [`LoopbackEngine`] implements [`Engine`] without sockets. Client calls
//! (see [`RequestBuilder`](crate::RequestBuilder) and
//! [`ClientSocket`](crate::ClientSocket)) queue events, and
//! [`Engine::poll`] hands them to the attached sink one at a time, the same
//! way a native reactor calls back into the layer.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::{Rc, Weak};

use bytes::Bytes;
use rivet_core::transport::{
    Engine, EventSink, ListenInfo, ListenOptions, MethodFilter, NativeRequest, NativeResponse,
    OpCode, PollMode, RouteId, Token, UpgradeContext, WsRouteOptions,
};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::client::RequestBuilder;
use crate::exchange::Exchange;
use crate::router::{RouteEntry, RouteKind, Router};
use crate::socket::LoopbackSocket;

/// Events dispatched by a single [`Engine::poll`] at most.
pub const MAX_EVENTS_PER_POLL: usize = 4096;

/// First port handed out when listening on port 0.
const EPHEMERAL_PORT_BASE: u16 = 49152;

pub(crate) enum Event {
    Request(Rc<Exchange>),
    Data { token: Token, chunk: Bytes, end: bool },
    Writable(Rc<Exchange>),
    Aborted(Rc<Exchange>),
    WsOpen(Rc<LoopbackSocket>),
    WsMessage { socket: Rc<LoopbackSocket>, payload: Bytes, opcode: OpCode },
    WsPing(Rc<LoopbackSocket>, Bytes),
    WsPong(Rc<LoopbackSocket>, Bytes),
    WsDrain(Rc<LoopbackSocket>),
    WsClose { socket: Rc<LoopbackSocket>, code: u16, reason: Bytes },
    Subscription { socket: Rc<LoopbackSocket>, topic: String, new_count: u32, old_count: u32 },
    MissingServerName(String),
}

/// An [`Engine`] that serves requests made from the same thread.
pub struct LoopbackEngine {
    me: Weak<LoopbackEngine>,
    sink: RefCell<Option<Weak<dyn EventSink>>>,
    router: RefCell<Router>,
    queue: RefCell<VecDeque<Event>>,
    broker: RefCell<BTreeMap<String, Vec<Rc<LoopbackSocket>>>>,
    listening: RefCell<Vec<ListenInfo>>,
    fail_listen: Cell<bool>,
    server_names: RefCell<BTreeSet<String>>,
    next_id: Cell<u64>,
    next_port: Cell<u16>,
    send_buffer: Cell<Option<u64>>,
}

impl LoopbackEngine {
    /// Creates an engine with no routes that is not listening.
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            sink: RefCell::new(None),
            router: RefCell::new(Router::new()),
            queue: RefCell::new(VecDeque::new()),
            broker: RefCell::new(BTreeMap::new()),
            listening: RefCell::new(Vec::new()),
            fail_listen: Cell::new(false),
            server_names: RefCell::new(BTreeSet::new()),
            next_id: Cell::new(1),
            next_port: Cell::new(EPHEMERAL_PORT_BASE),
            send_buffer: Cell::new(None),
        })
    }

    /// Starts building a request.
    pub fn request(&self, method: &str, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.me.clone(), method, url)
    }

    /// Shorthand for a `GET` request.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request("GET", url)
    }

    /// Shorthand for a `POST` request.
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request("POST", url)
    }

    /// Makes the next `listen` calls fail, like a port already in use.
    pub fn set_listen_failure(&self, fail: bool) {
        self.fail_listen.set(fail);
    }

    /// Send buffer size given to new responses. `None` never fills up.
    pub fn set_send_buffer(&self, capacity: Option<u64>) {
        self.send_buffer.set(capacity);
    }

    /// `true` while at least one listen socket is open.
    pub fn is_listening(&self) -> bool {
        !self.listening.borrow().is_empty()
    }

    /// Open listen sockets.
    pub fn listeners(&self) -> Vec<ListenInfo> {
        self.listening.borrow().clone()
    }

    /// Registered TLS server names.
    pub fn server_names(&self) -> Vec<String> {
        self.server_names.borrow().iter().cloned().collect()
    }

    /// A TLS client asks for `hostname`. Registered names are served
    /// silently; anything else reaches the sink on the next poll.
    pub fn request_server_name(&self, hostname: &str) {
        if !self.server_names.borrow().contains(hostname) {
            self.enqueue_all(vec![Event::MissingServerName(hostname.to_string())]);
        }
    }

    /// Events waiting for the next poll.
    pub fn pending_events(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.router.borrow().len()
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub(crate) fn default_send_buffer(&self) -> Option<u64> {
        self.send_buffer.get()
    }

    pub(crate) fn weak(&self) -> Weak<Self> {
        self.me.clone()
    }

    pub(crate) fn enqueue_all(&self, events: Vec<Event>) {
        self.queue.borrow_mut().extend(events);
    }

    pub(crate) fn open_socket(
        &self,
        (route, options): (RouteId, WsRouteOptions),
        user_data: Option<Uuid>,
        remote_address: String,
    ) -> Rc<LoopbackSocket> {
        let socket = LoopbackSocket::new(
            self.next_id(),
            route,
            options,
            user_data,
            remote_address,
            self.me.clone(),
        );
        self.enqueue_all(vec![Event::WsOpen(Rc::clone(&socket))]);
        socket
    }

    pub(crate) fn broker_add(&self, topic: &str, socket: &Rc<LoopbackSocket>) {
        self.broker
            .borrow_mut()
            .entry(topic.to_string())
            .or_default()
            .push(Rc::clone(socket));
    }

    pub(crate) fn broker_remove(&self, topic: &str, socket_id: u64) {
        let mut broker = self.broker.borrow_mut();
        if let Some(subscribers) = broker.get_mut(topic) {
            subscribers.retain(|s| s.id != socket_id);
            if subscribers.is_empty() {
                broker.remove(topic);
            }
        }
    }

    pub(crate) fn num_subscribers_of(&self, topic: &str) -> u32 {
        self.broker
            .borrow()
            .get(topic)
            .map_or(0, |subscribers| subscribers.len() as u32)
    }

    fn sink(&self) -> Option<Rc<dyn EventSink>> {
        self.sink.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn dispatch(&self, sink: &dyn EventSink, event: Event) {
        match event {
            Event::Request(exchange) => self.dispatch_request(sink, &exchange),
            Event::Data { token, chunk, end } => sink.on_data(token, &chunk, end),
            Event::Writable(exchange) => {
                let (token, offset, open) = {
                    let state = exchange.state.borrow();
                    (
                        state.writable_token,
                        state.record.write_offset,
                        !state.record.aborted && !state.record.ended,
                    )
                };
                if let (Some(token), true) = (token, open) {
                    if !sink.on_writable(token, offset) {
                        trace!(exchange = exchange.id, "writable handler wants another call");
                    }
                }
            }
            Event::Aborted(exchange) => {
                let token = exchange.state.borrow().abort_token;
                if let Some(token) = token {
                    sink.on_aborted(token);
                }
            }
            Event::WsOpen(socket) => {
                let route = socket.route;
                sink.on_ws_open(route, socket);
            }
            Event::WsMessage { socket, payload, opcode } => {
                if socket.is_open() {
                    let route = socket.route;
                    sink.on_ws_message(route, socket, &payload, opcode);
                }
            }
            Event::WsPing(socket, payload) => {
                if socket.is_open() {
                    let route = socket.route;
                    sink.on_ws_ping(route, socket, &payload);
                }
            }
            Event::WsPong(socket, payload) => {
                if socket.is_open() {
                    let route = socket.route;
                    sink.on_ws_pong(route, socket, &payload);
                }
            }
            Event::WsDrain(socket) => {
                if socket.is_open() {
                    let route = socket.route;
                    sink.on_ws_drain(route, socket);
                }
            }
            Event::WsClose { socket, code, reason } => {
                let route = socket.route;
                sink.on_ws_close(route, socket, code, &reason);
            }
            Event::Subscription {
                socket,
                topic,
                new_count,
                old_count,
            } => {
                let route = socket.route;
                sink.on_ws_subscription(route, socket, &topic, new_count, old_count);
            }
            Event::MissingServerName(hostname) => sink.on_missing_server_name(&hostname),
        }
    }

    /// Offers the request to every matching route until one keeps it.
    fn dispatch_request(&self, sink: &dyn EventSink, exchange: &Rc<Exchange>) {
        let (method, url) = exchange.request.method_and_url();
        let upgrade = exchange.request.wants_upgrade();
        let candidates = self.router.borrow().matches(&method, &url, upgrade);

        for candidate in candidates {
            exchange.request.prepare(candidate.params);
            let response: Rc<dyn NativeResponse> = exchange.clone();
            let request: Rc<dyn NativeRequest> = exchange.request.clone();
            match candidate.entry.kind {
                RouteKind::Http(_) => sink.on_request(candidate.entry.id, response, request),
                RouteKind::Ws(options) => {
                    exchange.state.borrow_mut().route = Some((candidate.entry.id, options));
                    sink.on_upgrade(
                        candidate.entry.id,
                        response,
                        request,
                        UpgradeContext::new(exchange.id),
                    );
                }
            }
            let yielded = exchange.request.get_yield();
            exchange.request.expire();
            if !yielded || exchange.has_responded() {
                return;
            }
            trace!(route = %candidate.entry.id, url = %url, "handler yielded");
        }

        debug!(method = %method, url = %url, "no route handled the request");
        exchange.write_status("404 Not Found");
        exchange.end(b"", false);
    }
}

impl Engine for LoopbackEngine {
    fn attach(&self, sink: Weak<dyn EventSink>) {
        *self.sink.borrow_mut() = Some(sink);
    }

    fn add_route(&self, method: MethodFilter, pattern: &str, route: RouteId) {
        self.router.borrow_mut().insert(
            pattern,
            RouteEntry {
                id: route,
                kind: RouteKind::Http(method),
            },
        );
    }

    fn add_ws_route(&self, pattern: &str, options: &WsRouteOptions, route: RouteId) {
        self.router.borrow_mut().insert(
            pattern,
            RouteEntry {
                id: route,
                kind: RouteKind::Ws(options.clone()),
            },
        );
    }

    fn listen(&self, options: &ListenOptions) -> Option<ListenInfo> {
        if self.fail_listen.get() {
            debug!(host = %options.host, port = options.port, "listen refused");
            return None;
        }
        let port = if options.port == 0 && options.domain.is_none() {
            let port = self.next_port.get();
            self.next_port.set(port.wrapping_add(1).max(EPHEMERAL_PORT_BASE));
            port
        } else {
            options.port
        };
        let info = ListenInfo {
            host: options.host.clone(),
            port,
            domain: options.domain.clone(),
        };
        self.listening.borrow_mut().push(info.clone());
        Some(info)
    }

    fn poll(&self, _mode: PollMode) -> usize {
        let Some(sink) = self.sink() else {
            return 0;
        };
        let mut dispatched = 0;
        while dispatched < MAX_EVENTS_PER_POLL {
            let next = self.queue.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            self.dispatch(sink.as_ref(), event);
            dispatched += 1;
        }
        dispatched
    }

    fn close(&self) {
        let closed = std::mem::take(&mut *self.listening.borrow_mut());
        debug!(sockets = closed.len(), "listen sockets closed");
    }

    fn publish(&self, topic: &str, message: &[u8], opcode: OpCode, _compress: bool) -> bool {
        let subscribers = self.broker.borrow().get(topic).cloned().unwrap_or_default();
        for socket in &subscribers {
            socket.deliver(message, opcode);
        }
        !subscribers.is_empty()
    }

    fn num_subscribers(&self, topic: &str) -> u32 {
        self.num_subscribers_of(topic)
    }

    fn add_server_name(&self, hostname: &str) {
        self.server_names.borrow_mut().insert(hostname.to_string());
    }

    fn remove_server_name(&self, hostname: &str) {
        self.server_names.borrow_mut().remove(hostname);
    }
}

impl std::fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEngine")
            .field("routes", &self.router.borrow().len())
            .field("pending_events", &self.queue.borrow().len())
            .field("listening", &self.listening.borrow().len())
            .finish_non_exhaustive()
    }
}
