//! # Rivet Server
//!
//! The application surface of Rivet: [`App`], pooled [`Request`] and
//! [`Response`] wrappers, route handlers and the error pipeline.
//!
//! Engine callbacks are turned into handler calls by a dispatcher that
//! acquires wrappers from their pools, runs the handler inline or as a
//! task on the app's single-threaded scheduler, and hands the wrappers
//! back once the response is finished.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rivet_server::routes::{handler, task};
//! use rivet_server::App;
//!
//! let mut app = App::new(engine)?;
//! app.get("/", handler(|res, _req| {
//!     res.end("hello word");
//!     Ok(())
//! }))
//! .post("/echo", task(|res, _req| async move {
//!     let body = res.get_data().await;
//!     res.end(body);
//!     Ok(())
//! }));
//! app.listen(8000_u16, |_| {})?;
//! app.run()?;
//! ```

#![doc(html_root_url = "https://docs.rs/rivet-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod app;
mod context;
pub mod cookie;
mod dispatch;
pub mod error_handler;
pub mod options;
pub mod request;
pub mod response;
pub mod routes;

pub use app::{App, AppExtension};
pub use cookie::{CookieJar, CookieOptions, SameSite, SetCookie};
pub use error_handler::{ErrorArgs, ErrorPipeline, ErrorSource, INTERNAL_ERROR_BODY};
pub use options::{AppOptions, AppOptionsBuilder};
pub use request::{Request, RequestSnapshot};
pub use response::{Response, StreamState};
pub use routes::{HttpHandler, UpgradeArgs, WsRoute};
