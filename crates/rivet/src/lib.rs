//! # Rivet
//!
//! **Pooled HTTP and WebSocket request layer over a callback-driven engine**
//!
//! Rivet sits between a native transport engine and application handlers:
//!
//! - **Pooled wrappers** – Request, response and connection objects are reused across events
//! - **Sync or async handlers** – Async handlers run on a single-threaded scheduler
//! - **Backpressure** – `send_chunk` waits out a full socket and resumes at the right offset
//! - **Aborts** – A disconnect resolves every pending read and write immediately
//! - **WebSockets** – Upgrades with user data, pub/sub and drain notifications
//! - **Extensions** – Properties, methods and capabilities added to every wrapper
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivet::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = App::new(engine)?;
//!     app.get("/", handler(|res, _req| {
//!         res.end("hello world");
//!         Ok(())
//!     }))
//!     .post("/echo", task(|res, _req| async move {
//!         let body = res.get_data().await;
//!         res.end(body);
//!         Ok(())
//!     }));
//!
//!     app.listen(8000_u16, |info| println!("listening on {}", info.port))?;
//!     app.run()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Engine ──events──► Dispatcher ──acquire──► Pool ──► Handler (sync | task)
//!                                                        │
//! Engine ◄──writes── Response / Connection ◄─────────────┘
//! ```

#![doc(html_root_url = "https://docs.rs/rivet/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export the engine boundary, pools and scheduler
pub use rivet_core as core;

// Re-export the app, request and response surface
pub use rivet_server as server;

// Re-export WebSocket types
pub use rivet_ws as ws;

// Re-export configuration loading
pub use rivet_config as config;

// Re-export logging and metrics setup
pub use rivet_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use rivet::prelude::*;
/// ```
pub mod prelude {
    pub use rivet_core::{
        Callback, Engine, Extensible, HandlerResult, ListenInfo, ListenOptions, RivetError,
        RivetResult, ShutdownSignal, UpgradeContext, WsRouteOptions,
    };

    pub use rivet_server::routes::{handler, task, upgrade_handler, upgrade_task};
    pub use rivet_server::{
        App, AppOptions, CookieOptions, Request, RequestSnapshot, Response, SameSite, StreamState,
        WsRoute,
    };

    pub use rivet_ws::{CloseCode, Connection, Message, OpCode, SendStatus};

    pub use rivet_config::{ConfigLoader, RivetConfig};
}
