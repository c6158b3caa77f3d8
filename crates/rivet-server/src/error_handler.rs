//! The error pipeline.
//!
//! Every error a handler returns (or a panic it raises) ends up in
//! [`ErrorPipeline::invoke`]. With no custom handler installed the
//! default handler logs the error once and, if the response can still be
//! written, answers `500 Internal Error`. A custom handler replaces that
//! behavior; if the custom handler itself fails, the default runs instead.
//!
//! Errors never escape the pipeline: secondary failures while writing the
//! 500 are swallowed because writes on a finished or aborted response are
//! no-ops.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use http::StatusCode;
use rivet_core::callback::{Callback, Invocation};
use rivet_telemetry::metrics;
use tracing::error;

use crate::request::Request;
use crate::response::Response;

/// Body written by the default handler.
pub const INTERNAL_ERROR_BODY: &str = "Internal Error";

/// Arguments of a custom error handler.
///
/// The response and request are present for errors raised while handling
/// an HTTP request, and absent for WebSocket and lifecycle errors.
pub type ErrorArgs = (Rc<anyhow::Error>, Option<Response>, Option<Request>);

/// Where an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSource {
    /// An HTTP route, abort or cork handler.
    Request,
    /// A WebSocket event handler.
    WebSocket,
    /// A startup or shutdown hook.
    Lifecycle,
}

impl ErrorSource {
    /// Label used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::WebSocket => "websocket",
            Self::Lifecycle => "lifecycle",
        }
    }

    /// Line the default handler logs for an error from this source.
    pub const fn uncaught_message(self) -> &'static str {
        match self {
            Self::Request => "uncaught error in request handler",
            Self::WebSocket => "uncaught error in websocket handler",
            Self::Lifecycle => "uncaught error in lifecycle hook",
        }
    }
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatches errors to the custom handler or the default one.
#[derive(Clone, Default)]
pub struct ErrorPipeline {
    handler: Rc<RefCell<Option<Callback<ErrorArgs>>>>,
}

impl ErrorPipeline {
    /// A pipeline that uses the default handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or removes the custom handler.
    pub fn set_handler(&self, handler: Option<Callback<ErrorArgs>>) {
        *self.handler.borrow_mut() = handler;
    }

    /// `true` if a custom handler is installed.
    pub fn has_handler(&self) -> bool {
        self.handler.borrow().is_some()
    }

    /// Handles one error.
    ///
    /// Returns the remainder of the work when the custom handler is a
    /// task; the caller decides whether to await or spawn it.
    pub fn invoke(
        &self,
        source: ErrorSource,
        error: anyhow::Error,
        res: Option<Response>,
        req: Option<Request>,
    ) -> Option<LocalBoxFuture<'static, ()>> {
        metrics::record_handler_error(source.as_str());
        let error = Rc::new(error);
        let handler = self.handler.borrow().clone();
        let Some(handler) = handler else {
            default_handler(source, &error, res.as_ref(), None);
            return None;
        };

        match handler.invoke((Rc::clone(&error), res.clone(), req)) {
            Invocation::Done(Ok(())) => None,
            Invocation::Done(Err(failure)) => {
                default_handler(source, &error, res.as_ref(), Some(&failure));
                None
            }
            Invocation::Pending(fut) => Some(
                async move {
                    if let Err(failure) = fut.await {
                        default_handler(source, &error, res.as_ref(), Some(&failure));
                    }
                }
                .boxed_local(),
            ),
        }
    }
}

impl fmt::Debug for ErrorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorPipeline")
            .field("custom", &self.has_handler())
            .finish()
    }
}

/// Logs `error` once and answers `500` if the response is still open.
pub fn default_handler(
    source: ErrorSource,
    error: &anyhow::Error,
    res: Option<&Response>,
    handler_failure: Option<&anyhow::Error>,
) {
    match handler_failure {
        Some(failure) => error!(
            source = %source,
            error = %format!("{error:#}"),
            handler_error = %format!("{failure:#}"),
            "{}",
            source.uncaught_message()
        ),
        None => error!(
            source = %source,
            error = %format!("{error:#}"),
            "{}",
            source.uncaught_message()
        ),
    }
    if let Some(res) = res {
        if !res.has_responded() {
            res.write_status(StatusCode::INTERNAL_SERVER_ERROR)
                .end(INTERNAL_ERROR_BODY);
        }
    }
}
