//! # Rivet Test
//!
//! An in-process [`Engine`](rivet_core::Engine) for testing Rivet apps
//! without sockets or port binding.
//!
//! [`LoopbackEngine`] keeps an event queue instead of a reactor. Requests
//! and WebSocket frames sent from the client API are queued and handed to
//! the app one by one when the app polls the engine, so a test sees
//! exactly the callback order a native engine produces.
//!
//! ## Key Features
//!
//! - **Routing**: static, `:param` and `*` segments, with yield fall-through
//! - **Backpressure**: per-response send buffers that fill up and drain on demand
//! - **Aborts**: the client can disconnect at any point
//! - **WebSockets**: upgrades, pub/sub with subscription events, stalled readers
//! - **Recording**: every status, header, body byte and flush is kept for assertions
//!
//! ## Example
//!
//! ```ignore
//! use rivet_server::{routes::handler, App};
//! use rivet_test::LoopbackEngine;
//!
//! let engine = LoopbackEngine::new();
//! let mut app = App::new(engine.clone())?;
//! app.get("/", handler(|res, _req| {
//!     res.end("hello");
//!     Ok(())
//! }));
//! app.listen(0_u16, |_| {})?;
//!
//! let res = engine.get("/").send();
//! app.poll_once();
//! res.assert_status_code(200).assert_body_eq("hello");
//! ```

#![doc(html_root_url = "https://docs.rs/rivet-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod engine;
mod exchange;
mod router;
mod socket;

pub use client::{ClientSocket, LoopbackResponse, RequestBuilder, TEST_WEBSOCKET_KEY};
pub use engine::{LoopbackEngine, MAX_EVENTS_PER_POLL};
pub use exchange::{ResponseRecord, UpgradeRecord};
pub use router::{RouteEntry, RouteKind, RouteMatch, Router};
pub use socket::ABNORMAL_CLOSURE;
