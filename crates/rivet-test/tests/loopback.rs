//! Engine-level tests: a recording sink stands in for the app.

use std::cell::RefCell;
use std::rc::Rc;

use http::Method;
use rivet_core::transport::{
    Engine, EventSink, ListenOptions, MethodFilter, NativeRequest, NativeResponse, NativeSocket,
    OpCode, PollMode, RouteId, SendStatus, Token, UpgradeContext, WsRouteOptions,
};
use rivet_test::{LoopbackEngine, ABNORMAL_CLOSURE};

type RequestHook = Box<dyn Fn(RouteId, &Rc<dyn NativeResponse>, &Rc<dyn NativeRequest>)>;

#[derive(Default)]
struct Recorder {
    events: RefCell<Vec<String>>,
    on_request: RefCell<Option<RequestHook>>,
    sockets: RefCell<Vec<Rc<dyn NativeSocket>>>,
    responses: RefCell<Vec<Rc<dyn NativeResponse>>>,
}

impl Recorder {
    fn attach(engine: &Rc<LoopbackEngine>) -> Rc<Self> {
        let recorder = Rc::new(Self::default());
        let sink: Rc<dyn EventSink> = recorder.clone();
        engine.attach(Rc::downgrade(&sink));
        recorder
    }

    fn hook(&self, hook: impl Fn(RouteId, &Rc<dyn NativeResponse>, &Rc<dyn NativeRequest>) + 'static) {
        *self.on_request.borrow_mut() = Some(Box::new(hook));
    }

    fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    fn push(&self, event: String) {
        self.events.borrow_mut().push(event);
    }
}

impl EventSink for Recorder {
    fn on_request(
        &self,
        route: RouteId,
        response: Rc<dyn NativeResponse>,
        request: Rc<dyn NativeRequest>,
    ) {
        self.push(format!("request {route} {}", request.url()));
        if let Some(hook) = self.on_request.borrow().as_ref() {
            hook(route, &response, &request);
        }
        self.responses.borrow_mut().push(response);
    }

    fn on_upgrade(
        &self,
        route: RouteId,
        response: Rc<dyn NativeResponse>,
        request: Rc<dyn NativeRequest>,
        context: UpgradeContext,
    ) {
        self.push(format!("upgrade {route}"));
        let key = request.header("sec-websocket-key").unwrap_or_default();
        response.upgrade(None, &key, "", "", context);
    }

    fn on_data(&self, token: Token, chunk: &[u8], is_end: bool) {
        self.push(format!(
            "data {token} {} {is_end}",
            String::from_utf8_lossy(chunk)
        ));
    }

    fn on_writable(&self, token: Token, offset: u64) -> bool {
        self.push(format!("writable {token} {offset}"));
        true
    }

    fn on_aborted(&self, token: Token) {
        self.push(format!("aborted {token}"));
    }

    fn on_ws_open(&self, route: RouteId, socket: Rc<dyn NativeSocket>) {
        self.push(format!("open {route}"));
        self.sockets.borrow_mut().push(socket);
    }

    fn on_ws_message(
        &self,
        _route: RouteId,
        socket: Rc<dyn NativeSocket>,
        payload: &[u8],
        opcode: OpCode,
    ) {
        self.push(format!("message {}", String::from_utf8_lossy(payload)));
        socket.send(payload, opcode, false, true);
    }

    fn on_ws_drain(&self, _route: RouteId, _socket: Rc<dyn NativeSocket>) {
        self.push("drain".to_string());
    }

    fn on_ws_ping(&self, _route: RouteId, _socket: Rc<dyn NativeSocket>, payload: &[u8]) {
        self.push(format!("ping {}", String::from_utf8_lossy(payload)));
    }

    fn on_ws_pong(&self, _route: RouteId, _socket: Rc<dyn NativeSocket>, _payload: &[u8]) {
        self.push("pong".to_string());
    }

    fn on_ws_close(&self, _route: RouteId, _socket: Rc<dyn NativeSocket>, code: u16, reason: &[u8]) {
        self.push(format!("close {code} {}", String::from_utf8_lossy(reason)));
    }

    fn on_ws_subscription(
        &self,
        _route: RouteId,
        _socket: Rc<dyn NativeSocket>,
        topic: &str,
        new_count: u32,
        old_count: u32,
    ) {
        self.push(format!("subscription {topic} {old_count}->{new_count}"));
    }

    fn on_missing_server_name(&self, hostname: &str) {
        self.push(format!("missing {hostname}"));
    }
}

fn listening_engine() -> Rc<LoopbackEngine> {
    let engine = LoopbackEngine::new();
    engine
        .listen(&ListenOptions::port(0))
        .expect("loopback listen");
    engine
}

fn poll(engine: &LoopbackEngine) -> usize {
    engine.poll(PollMode::NoWait)
}

#[test]
fn test_request_dispatch_and_params() {
    let engine = listening_engine();
    engine.add_route(MethodFilter::Only(Method::GET), "/users/:id", RouteId(0));
    let recorder = Recorder::attach(&engine);
    recorder.hook(|_, res, req| {
        assert_eq!(req.parameter(0).as_deref(), Some("42"));
        assert_eq!(req.query("verbose").as_deref(), Some("yes please"));
        res.end(b"ok", false);
    });

    let res = engine.get("/users/42?verbose=yes+please").send();
    assert_eq!(poll(&engine), 1);

    assert_eq!(recorder.events(), vec!["request route#0 /users/42"]);
    res.assert_status_code(200).assert_body_eq("ok");
    assert!(res.is_ended());
}

#[test]
fn test_request_is_unreadable_after_dispatch() {
    let engine = listening_engine();
    engine.add_route(MethodFilter::Any, "/", RouteId(0));
    let recorder = Recorder::attach(&engine);
    let kept = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&kept);
    recorder.hook(move |_, _, req| {
        *slot.borrow_mut() = Some(Rc::clone(req));
    });

    engine.get("/").header("X-Trace", "abc").send();
    poll(&engine);

    let req = kept.borrow_mut().take().expect("request kept");
    assert_eq!(req.header("x-trace"), None);
    assert_eq!(req.url(), "");
}

#[test]
fn test_unmatched_request_gets_404() {
    let engine = listening_engine();
    let _recorder = Recorder::attach(&engine);

    let res = engine.get("/nowhere").send();
    poll(&engine);
    res.assert_status_code(404);
    assert!(res.is_ended());
}

#[test]
fn test_yield_falls_through_to_next_route() {
    let engine = listening_engine();
    engine.add_route(MethodFilter::Only(Method::GET), "/files/:name", RouteId(0));
    engine.add_route(MethodFilter::Any, "/*", RouteId(1));
    let recorder = Recorder::attach(&engine);
    recorder.hook(|route, res, req| {
        if route == RouteId(0) {
            req.set_yield(true);
        } else {
            res.end(b"fallback", false);
        }
    });

    let res = engine.get("/files/a.txt").send();
    poll(&engine);

    assert_eq!(
        recorder.events(),
        vec!["request route#0 /files/a.txt", "request route#1 /files/a.txt"]
    );
    res.assert_body_eq("fallback");
}

#[test]
fn test_refused_when_not_listening() {
    let engine = LoopbackEngine::new();
    let _recorder = Recorder::attach(&engine);
    let res = engine.get("/").send();
    assert!(res.is_refused());
    assert_eq!(engine.pending_events(), 0);
}

#[test]
fn test_listen_failure_and_ephemeral_ports() {
    let engine = LoopbackEngine::new();
    engine.set_listen_failure(true);
    assert!(engine.listen(&ListenOptions::port(8080)).is_none());
    assert!(!engine.is_listening());

    engine.set_listen_failure(false);
    let first = engine.listen(&ListenOptions::port(0)).expect("first");
    let second = engine.listen(&ListenOptions::port(0)).expect("second");
    assert_ne!(first.port, second.port);
    assert!(engine.is_listening());

    engine.close();
    assert!(!engine.is_listening());
}

#[test]
fn test_body_chunks_arrive_after_registration() {
    let engine = listening_engine();
    engine.add_route(MethodFilter::Only(Method::POST), "/upload", RouteId(0));
    let recorder = Recorder::attach(&engine);
    recorder.hook(|_, res, _| res.on_data(Token::new(0, 0)));

    let res = engine.post("/upload").body("ab").body("cd").send();
    poll(&engine);

    assert_eq!(
        recorder.events(),
        vec![
            "request route#0 /upload",
            "data 0v0 ab false",
            "data 0v0 cd true",
        ]
    );
    assert!(!res.is_ended());
}

#[test]
fn test_streaming_body_and_empty_body() {
    let engine = listening_engine();
    engine.add_route(MethodFilter::Any, "/", RouteId(0));
    let recorder = Recorder::attach(&engine);
    recorder.hook(|_, res, _| res.on_data(Token::new(1, 0)));

    let streaming = engine.post("/").streaming_body().send();
    poll(&engine);
    streaming.push_body("x", false);
    streaming.push_body("", true);
    poll(&engine);

    engine.get("/").send();
    poll(&engine);

    assert_eq!(
        recorder.events(),
        vec![
            "request route#0 /",
            "data 1v0 x false",
            "data 1v0  true",
            "request route#0 /",
            "data 1v0  true",
        ]
    );
}

#[test]
fn test_try_end_partial_write_and_drain() {
    let engine = listening_engine();
    engine.add_route(MethodFilter::Any, "/", RouteId(0));
    let recorder = Recorder::attach(&engine);
    recorder.hook(|_, res, _| {
        res.on_writable(Token::new(2, 0));
        assert_eq!(res.try_end(b"hello world", 11, false), (false, false));
        assert_eq!(res.write_offset(), 4);
    });

    let res = engine.get("/").send_buffer(4).send();
    poll(&engine);
    assert_eq!(res.text(), "hell");

    res.drain(100);
    poll(&engine);
    assert_eq!(recorder.events().last().map(String::as_str), Some("writable 2v0 4"));

    let native = recorder.responses.borrow()[0].clone();
    assert_eq!(native.try_end(b"o world", 11, false), (true, true));
    res.assert_body_eq("hello world");
    assert!(res.is_ended());
}

#[test]
fn test_cork_counts_one_flush() {
    let engine = listening_engine();
    engine.add_route(MethodFilter::Any, "/", RouteId(0));
    let recorder = Recorder::attach(&engine);
    recorder.hook(|_, res, _| {
        let native = Rc::clone(res);
        res.cork(&mut || {
            native.write_header("a", "1");
            native.write(b"x");
            native.end(b"y", false);
        });
    });

    let res = engine.get("/").send();
    poll(&engine);
    assert_eq!(res.flushes(), 1);
    assert_eq!(res.text(), "xy");
}

#[test]
fn test_abort_is_delivered_to_registered_token() {
    let engine = listening_engine();
    engine.add_route(MethodFilter::Any, "/", RouteId(0));
    let recorder = Recorder::attach(&engine);
    recorder.hook(|_, res, _| res.on_aborted(Token::new(3, 1)));

    let res = engine.get("/").send();
    poll(&engine);
    res.abort();
    res.abort();
    poll(&engine);

    assert_eq!(
        recorder.events(),
        vec!["request route#0 /", "aborted 3v1"]
    );
    assert!(res.is_aborted());
}

#[test]
fn test_websocket_echo_and_close() {
    let engine = listening_engine();
    engine.add_ws_route("/ws", &WsRouteOptions::default(), RouteId(7));
    let recorder = Recorder::attach(&engine);

    let client = engine.get("/ws").websocket();
    poll(&engine);
    assert!(client.is_open());
    assert_eq!(client.response().status_code(), Some(101));

    assert!(client.send_text("hi"));
    assert!(client.ping("p"));
    poll(&engine);
    assert_eq!(client.received_text(), vec!["hi"]);

    client.close(1000, "bye");
    poll(&engine);
    assert!(!client.is_open());
    assert!(!client.send_text("late"));

    assert_eq!(
        recorder.events(),
        vec![
            "upgrade route#7",
            "open route#7",
            "message hi",
            "ping p",
            "close 1000 bye",
        ]
    );
}

#[test]
fn test_pub_sub_and_subscription_events() {
    let engine = listening_engine();
    engine.add_ws_route("/ws", &WsRouteOptions::default(), RouteId(0));
    let recorder = Recorder::attach(&engine);

    let a = engine.get("/ws").websocket();
    let b = engine.get("/ws").websocket();
    poll(&engine);

    let sockets = recorder.sockets.borrow().clone();
    assert!(sockets[0].subscribe("news"));
    assert!(!sockets[0].subscribe("news"));
    assert!(sockets[1].subscribe("news"));
    assert_eq!(engine.num_subscribers("news"), 2);

    assert!(engine.publish("news", b"hello", OpCode::Text, false));
    assert!(!engine.publish("sports", b"nobody", OpCode::Text, false));
    assert_eq!(a.received_text(), vec!["hello"]);
    assert_eq!(b.received_text(), vec!["hello"]);

    sockets[1].close();
    poll(&engine);
    assert_eq!(engine.num_subscribers("news"), 1);
    assert_eq!(b.close_info(), Some((ABNORMAL_CLOSURE, String::new())));

    let events = recorder.events();
    assert!(events.contains(&"subscription news 0->1".to_string()));
    assert!(events.contains(&"subscription news 1->2".to_string()));
}

#[test]
fn test_stalled_reader_reports_backpressure() {
    let engine = listening_engine();
    let options = WsRouteOptions {
        max_backpressure: 8,
        ..WsRouteOptions::default()
    };
    engine.add_ws_route("/ws", &options, RouteId(0));
    let recorder = Recorder::attach(&engine);

    let client = engine.get("/ws").websocket();
    poll(&engine);
    client.stall();

    let socket = recorder.sockets.borrow()[0].clone();
    assert_eq!(socket.send(b"12345", OpCode::Binary, false, true), SendStatus::Backpressure);
    assert_eq!(socket.buffered_amount(), 5);
    assert_eq!(socket.send(b"67890", OpCode::Binary, false, true), SendStatus::Dropped);
    assert!(client.received().is_empty());

    client.drain();
    poll(&engine);
    assert_eq!(client.received().len(), 1);
    assert_eq!(socket.buffered_amount(), 0);
    assert_eq!(recorder.events().last().map(String::as_str), Some("drain"));
}

#[test]
fn test_fragments_are_assembled() {
    let engine = listening_engine();
    engine.add_ws_route("/ws", &WsRouteOptions::default(), RouteId(0));
    let recorder = Recorder::attach(&engine);
    let client = engine.get("/ws").websocket();
    poll(&engine);

    let socket = recorder.sockets.borrow()[0].clone();
    socket.send_first_fragment(b"he", OpCode::Text, false);
    socket.send_fragment(b"ll", false);
    socket.send_last_fragment(b"o", false);
    assert_eq!(client.received_text(), vec!["hello"]);
}

#[test]
fn test_fragment_without_start_or_after_close_is_dropped() {
    let engine = listening_engine();
    engine.add_ws_route("/ws", &WsRouteOptions::default(), RouteId(0));
    let recorder = Recorder::attach(&engine);
    let client = engine.get("/ws").websocket();
    poll(&engine);

    let socket = recorder.sockets.borrow()[0].clone();
    assert_eq!(socket.send_fragment(b"ll", false), SendStatus::Dropped);

    assert_eq!(socket.send_first_fragment(b"he", OpCode::Text, false), SendStatus::Success);
    socket.end(1000, b"");
    assert_eq!(socket.send_fragment(b"ll", false), SendStatus::Dropped);
    assert!(client.received().is_empty());
}

#[test]
fn test_missing_server_name() {
    let engine = listening_engine();
    let recorder = Recorder::attach(&engine);
    engine.add_server_name("known.example");

    engine.request_server_name("known.example");
    engine.request_server_name("other.example");
    poll(&engine);

    assert_eq!(recorder.events(), vec!["missing other.example"]);
    assert_eq!(engine.server_names(), vec!["known.example"]);
}
