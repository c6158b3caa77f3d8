//! Whole-stack scenarios through the facade.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rivet::prelude::*;
use rivet_test::LoopbackEngine;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

const SETTLE_TICKS: usize = 8;

fn pump(app: &App) {
    for _ in 0..SETTLE_TICKS {
        app.poll_once();
    }
}

fn listening(configure: impl FnOnce(&mut App)) -> (App, Rc<LoopbackEngine>) {
    let engine = LoopbackEngine::new();
    let mut app = App::new(engine.clone()).unwrap();
    configure(&mut app);
    app.listen(ListenOptions::port(0), |_| {}).unwrap();
    (app, engine)
}

/// Counts log events whose message matches.
struct MessageCounter {
    needle: &'static str,
    hits: Arc<AtomicUsize>,
}

struct MessageVisitor<'a> {
    needle: &'a str,
    matched: bool,
}

impl Visit for MessageVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" && value == self.needle {
            self.matched = true;
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" && format!("{value:?}") == self.needle {
            self.matched = true;
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for MessageCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor {
            needle: self.needle,
            matched: false,
        };
        event.record(&mut visitor);
        if visitor.matched {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_hello_world() {
    let (app, engine) = listening(|app| {
        app.get("/", handler(|res, _req| {
            res.end("hello word");
            Ok(())
        }));
    });

    let res = engine.get("/").send();
    pump(&app);

    res.assert_status_code(200).assert_body_eq("hello word");
    assert!(res.is_ended());
}

#[test]
fn test_subscribe_on_open_then_publish_once() {
    let (app, engine) = listening(|app| {
        let behavior = app.ws_behavior().open(Callback::sync(|conn: Connection| {
            conn.subscribe("broadcast");
            Ok(())
        }));
        app.ws("/ws", behavior);
    });

    let client = engine.get("/ws").websocket();
    pump(&app);
    assert_eq!(app.num_subscribers("broadcast"), 1);

    app.publish("broadcast", "hi", OpCode::Text, false);
    pump(&app);

    assert_eq!(client.received_text(), vec!["hi"]);
}

#[test]
fn test_uncaught_error_logged_once_and_answered_500() {
    let hits = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(MessageCounter {
        needle: "uncaught error in request handler",
        hits: Arc::clone(&hits),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let (app, engine) = listening(|app| {
        app.get("/boom", task(|_res, _req| async move {
            Err::<(), _>(anyhow::anyhow!("exploded"))
        }));
    });

    let res = engine.get("/boom").send();
    pump(&app);

    res.assert_status_code(500).assert_body_eq("Internal Error");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
