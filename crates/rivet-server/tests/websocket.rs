//! WebSocket routes against the loopback engine.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytes::Bytes;
use rivet_core::callback::Callback;
use rivet_server::routes::upgrade_handler;
use rivet_ws::{CloseArgs, CloseCode, Connection, Message, OpCode, SendStatus, SubscriptionArgs};

use common::harness;

struct Session {
    name: String,
}

#[test]
fn test_echo() {
    let h = harness(|app| {
        let behavior = app.ws_behavior().message(Callback::sync(
            |(conn, msg): (Connection, Message)| {
                conn.send_message(&msg);
                Ok(())
            },
        ));
        app.ws("/echo", behavior);
    });

    let client = h.engine.get("/echo").websocket();
    h.pump();
    assert!(client.is_open());
    client.response().assert_status_code(101);

    assert!(client.send_text("ping"));
    assert!(client.send_binary(Bytes::from_static(&[1, 2, 3])));
    h.pump();

    let received = client.received();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0], (Bytes::from_static(b"ping"), OpCode::Text));
    assert_eq!(received[1].1, OpCode::Binary);
    assert_eq!(h.app.websocket_pool_stats().borrowed, 0);
}

#[test]
fn test_user_data_lives_until_close() {
    let closed = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&closed);
    let h = harness(move |app| {
        let slot = Rc::clone(&slot);
        let behavior = app
            .ws_behavior()
            .upgrade(upgrade_handler(|res, req, context| {
                let name = req.query("name").unwrap_or_default();
                let key = req.header("sec-websocket-key").unwrap_or_default();
                res.upgrade_with(Session { name }, &key, "", "", context);
                Ok(())
            }))
            .open(Callback::sync(|conn: Connection| {
                let session = conn
                    .get_user_data::<Session>()
                    .ok_or_else(|| anyhow::anyhow!("missing session"))?;
                conn.send_text(&format!("welcome {}", session.name));
                Ok(())
            }))
            .close(Callback::sync(move |(conn, code, reason): CloseArgs| {
                let name = conn.get_user_data::<Session>().map(|s| s.name.clone());
                *slot.borrow_mut() = Some((name, code, reason));
                Ok(())
            }));
        app.ws("/chat", behavior);
    });

    let client = h.engine.get("/chat?name=ada").websocket();
    h.pump();
    assert_eq!(client.received_text(), vec!["welcome ada"]);
    assert!(client.user_data().is_some());
    assert_eq!(h.app.user_data().len(), 1);

    client.close(CloseCode::Normal.as_u16(), "bye");
    h.pump();

    let (name, code, reason) = closed.borrow_mut().take().expect("close handler ran");
    assert_eq!(name.as_deref(), Some("ada"));
    assert_eq!(code, 1000);
    assert_eq!(reason, Bytes::from_static(b"bye"));
    assert!(h.app.user_data().is_empty());
    assert_eq!(h.app.request_pool_stats().borrowed, 0);
}

#[test]
fn test_subscribe_and_publish() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&events);
    let h = harness(move |app| {
        let log = Rc::clone(&log);
        let behavior = app
            .ws_behavior()
            .open(Callback::sync(|conn: Connection| {
                conn.subscribe("news");
                Ok(())
            }))
            .subscription(Callback::sync(
                move |(_conn, topic, new_count, old_count): SubscriptionArgs| {
                    log.borrow_mut().push((topic, new_count, old_count));
                    Ok(())
                },
            ));
        app.ws("/feed", behavior);
    });

    let first = h.engine.get("/feed").websocket();
    let second = h.engine.get("/feed").websocket();
    h.pump();
    assert_eq!(h.app.num_subscribers("news"), 2);
    assert_eq!(first.topics(), vec!["news"]);

    assert!(h.app.publish("news", "hi", OpCode::Text, false));
    h.pump();
    assert_eq!(first.received_text(), vec!["hi"]);
    assert_eq!(second.received_text(), vec!["hi"]);

    second.close(1000, "");
    h.pump();
    assert_eq!(h.app.num_subscribers("news"), 1);
    assert_eq!(
        events.borrow()[..2],
        [("news".to_string(), 1, 0), ("news".to_string(), 2, 1)]
    );
}

#[test]
fn test_publish_from_connection_reaches_sender() {
    let h = harness(|app| {
        let behavior = app
            .ws_behavior()
            .open(Callback::sync(|conn: Connection| {
                conn.subscribe("room");
                Ok(())
            }))
            .message(Callback::sync(|(conn, msg): (Connection, Message)| {
                conn.publish("room", msg.as_bytes(), msg.opcode(), false);
                Ok(())
            }));
        app.ws("/room", behavior);
    });

    let alice = h.engine.get("/room").websocket();
    let bob = h.engine.get("/room").websocket();
    h.pump();
    alice.send_text("hello");
    h.pump();

    assert_eq!(alice.received_text(), vec!["hello"]);
    assert_eq!(bob.received_text(), vec!["hello"]);
}

#[test]
fn test_backpressure_and_drain() {
    let statuses = Rc::new(RefCell::new(Vec::new()));
    let drains = Rc::new(Cell::new(0));
    let log = Rc::clone(&statuses);
    let counter = Rc::clone(&drains);
    let h = harness(move |app| {
        let log = Rc::clone(&log);
        let counter = Rc::clone(&counter);
        let behavior = app
            .ws_behavior()
            .max_backpressure(8)
            .close_on_backpressure_limit(false)
            .message(Callback::sync(move |(conn, _msg): (Connection, Message)| {
                log.borrow_mut().push(conn.send_text("12345"));
                Ok(())
            }))
            .drain(Callback::sync(move |conn: Connection| {
                assert_eq!(conn.buffered_amount(), 0);
                counter.set(counter.get() + 1);
                Ok(())
            }));
        app.ws("/slow", behavior);
    });

    let client = h.engine.get("/slow").websocket();
    h.pump();
    client.stall();
    for _ in 0..3 {
        client.send_text("go");
    }
    h.pump();

    assert_eq!(
        *statuses.borrow(),
        vec![SendStatus::Backpressure, SendStatus::Dropped, SendStatus::Dropped]
    );
    assert!(client.received().is_empty());

    client.drain();
    h.pump();
    assert_eq!(client.received_text(), vec!["12345"]);
    assert_eq!(drains.get(), 1);
    assert!(client.is_open());
}

#[test]
fn test_retained_connection_sends_after_event() {
    let kept: Rc<RefCell<Option<Connection>>> = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&kept);
    let h = harness(move |app| {
        let slot = Rc::clone(&slot);
        let behavior = app.ws_behavior().open(Callback::sync(move |conn: Connection| {
            *slot.borrow_mut() = conn.retain();
            Ok(())
        }));
        app.ws("/push", behavior);
    });

    let client = h.engine.get("/push").websocket();
    h.pump();

    let conn = kept.borrow_mut().take().expect("retained");
    assert_eq!(conn.send_text("later"), SendStatus::Success);
    conn.cork(|c| {
        c.send_text("a");
        c.send_text("b");
    });
    assert_eq!(client.received_text(), vec!["later", "a", "b"]);
    assert_eq!(client.flushes(), 2);

    conn.end(CloseCode::GoingAway.as_u16(), "restart");
    h.pump();
    assert_eq!(client.close_info(), Some((1001, "restart".to_string())));
}

#[test]
fn test_failing_ws_handler_keeps_connection() {
    let h = harness(|app| {
        let behavior = app
            .ws_behavior()
            .message(Callback::task(|(_conn, _msg): (Connection, Message)| async move {
                Err::<(), _>(anyhow::anyhow!("bad frame"))
            }));
        app.ws("/fragile", behavior);
    });

    let client = h.engine.get("/fragile").websocket();
    h.pump();
    client.send_text("x");
    h.pump();

    assert!(client.is_open());
    assert_eq!(h.app.websocket_pool_stats().borrowed, 0);
}
