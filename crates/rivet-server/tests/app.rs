//! App lifecycle: listening, running, hooks and server names.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rivet_config::ConfigLoader;
use rivet_core::callback::Callback;
use rivet_core::transport::ListenOptions;
use rivet_core::RivetError;
use rivet_server::routes::{handler, task};
use rivet_server::{App, AppOptions};
use rivet_test::LoopbackEngine;

use common::harness;

fn counter() -> (Rc<Cell<u32>>, Callback<()>) {
    let count = Rc::new(Cell::new(0));
    let hook = {
        let count = Rc::clone(&count);
        Callback::sync(move |()| {
            count.set(count.get() + 1);
            Ok(())
        })
    };
    (count, hook)
}

#[test]
fn test_listen_reports_port_and_runs_startup_once() {
    let engine = LoopbackEngine::new();
    let mut app = App::new(engine.clone()).unwrap();
    let (started, hook) = counter();
    app.on_start(hook);

    let mut reported = None;
    let info = app
        .listen(ListenOptions::port(0), |info| reported = Some(info.port))
        .unwrap();
    assert_ne!(info.port, 0);
    assert_eq!(reported, Some(info.port));
    assert_eq!(app.listen_info(), Some(info));
    assert!(engine.is_listening());

    app.listen(ListenOptions::port(0), |_| {}).unwrap();
    assert_eq!(engine.listeners().len(), 2);
    assert_eq!(started.get(), 1);
}

#[test]
fn test_listen_failure_is_an_error() {
    let engine = LoopbackEngine::new();
    engine.set_listen_failure(true);
    let mut app = App::new(engine).unwrap();

    let mut called = false;
    let err = app
        .listen(ListenOptions::port(9001), |_| called = true)
        .unwrap_err();
    assert!(!called);
    assert!(matches!(err, RivetError::Listen { port: 9001, .. }));
    assert!(app.listen_info().is_none());
}

#[test]
fn test_run_before_listen_is_an_error() {
    let mut app = App::new(LoopbackEngine::new()).unwrap();
    assert!(app.run().is_err());
}

#[test]
fn test_run_serves_until_shutdown_signal() {
    let engine = LoopbackEngine::new();
    let mut app = App::new(engine.clone()).unwrap();
    let (started, start_hook) = counter();
    let (stopped, stop_hook) = counter();
    let stop_order = Rc::new(RefCell::new(Vec::new()));

    let signal = app.shutdown_signal();
    let order = Rc::clone(&stop_order);
    app.on_start(start_hook)
        .on_shutdown(stop_hook)
        .on_shutdown_task(move || {
            let order = Rc::clone(&order);
            async move {
                tokio::task::yield_now().await;
                order.borrow_mut().push("async hook");
                Ok(())
            }
        })
        .get("/work", task(|res, _req| async move {
            tokio::task::yield_now().await;
            res.end("done");
            Ok(())
        }))
        .get("/stop", handler(move |res, _req| {
            signal.trigger();
            res.end("bye");
            Ok(())
        }));
    app.listen(ListenOptions::port(0), |_| {}).unwrap();

    let work = engine.get("/work").send();
    let stop = engine.get("/stop").send();
    app.run().unwrap();

    work.assert_body_eq("done");
    stop.assert_body_eq("bye");
    assert!(!engine.is_listening());
    assert_eq!(started.get(), 1);
    assert_eq!(stopped.get(), 1);
    assert_eq!(*stop_order.borrow(), vec!["async hook"]);
    assert_eq!(app.scheduler().in_flight(), 0);
}

#[test]
fn test_close_stops_run_immediately() {
    let engine = LoopbackEngine::new();
    let mut app = App::new(engine.clone()).unwrap();
    let (stopped, hook) = counter();
    app.on_shutdown(hook);
    app.listen(ListenOptions::port(0), |_| {}).unwrap();

    app.close();
    assert!(!engine.is_listening());
    assert!(app.shutdown_signal().is_shutdown());

    app.run().unwrap();
    assert_eq!(stopped.get(), 1);
}

#[test]
fn test_failing_startup_hook_does_not_stop_listen() {
    let mut app = App::new(LoopbackEngine::new()).unwrap();
    let (started, hook) = counter();
    app.on_start(Callback::sync(|()| anyhow::bail!("warmup failed")))
        .on_start(hook);

    assert!(app.listen(ListenOptions::port(0), |_| {}).is_ok());
    assert_eq!(started.get(), 1);
}

#[test]
fn test_missing_server_name() {
    let asked = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&asked);
    let h = harness(move |app| {
        app.add_server_name("example.com")
            .add_server_name("old.example.com")
            .remove_server_name("old.example.com")
            .missing_server_name(Callback::sync(move |hostname: String| {
                log.borrow_mut().push(hostname);
                Ok(())
            }));
    });
    assert_eq!(h.engine.server_names(), vec!["example.com"]);

    h.engine.request_server_name("example.com");
    h.engine.request_server_name("old.example.com");
    h.engine.request_server_name("unknown.test");
    h.pump();

    assert_eq!(*asked.borrow(), vec!["old.example.com", "unknown.test"]);
}

#[test]
fn test_from_config_applies_pools_and_listen_defaults() {
    let config = ConfigLoader::new()
        .with_string(
            "[server]\nport = 0\nhost = \"127.0.0.1\"\n\n[pools]\nrequest = 3\nresponse = 3\n",
            "toml",
        )
        .unwrap()
        .load()
        .unwrap();
    let options = AppOptions::from_config(&config);
    assert_eq!(options.request_pool(), 3);
    assert_eq!(options.websocket_pool(), 0);

    let engine = LoopbackEngine::new();
    let mut app = App::from_config(engine.clone(), &config).unwrap();
    app.get("/", handler(|res, _req| {
        res.end("configured");
        Ok(())
    }));
    let info = app.listen_default(|_| {}).unwrap();
    assert_eq!(info.host, "127.0.0.1");
    assert_eq!(app.populate(), 6);

    let res = engine.get("/").send();
    app.poll_once();
    res.assert_body_eq("configured");
    assert_eq!(app.response_pool_stats().transient, 0);
}
