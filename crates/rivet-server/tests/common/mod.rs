//! Shared setup for the server integration tests.

#![allow(dead_code)]

use std::rc::Rc;

use rivet_core::transport::ListenOptions;
use rivet_server::{App, AppOptions};
use rivet_test::LoopbackEngine;

/// Reactor iterations that let every short task chain settle.
const SETTLE_TICKS: usize = 8;

pub struct Harness {
    pub app: App,
    pub engine: Rc<LoopbackEngine>,
}

impl Harness {
    /// Polls the engine and runs ready tasks a few times.
    pub fn pump(&self) {
        for _ in 0..SETTLE_TICKS {
            self.app.poll_once();
        }
    }
}

/// An app with default options, configured by `configure`, listening.
pub fn harness(configure: impl FnOnce(&mut App)) -> Harness {
    harness_with(AppOptions::default(), configure)
}

pub fn harness_with(options: AppOptions, configure: impl FnOnce(&mut App)) -> Harness {
    let engine = LoopbackEngine::new();
    let mut app = App::with_options(engine.clone(), options).expect("app");
    configure(&mut app);
    app.listen(ListenOptions::port(0), |_| {}).expect("listen");
    Harness { app, engine }
}
