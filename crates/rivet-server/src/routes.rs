//! Route table and handler constructors.
//!
//! Handlers take `(Response, Request)`. Use [`handler`] for code that
//! finishes inside the engine callback and [`task`] for code that awaits.
//!
//! ```rust
//! use rivet_server::routes::{handler, task};
//!
//! let hello = handler(|res, _req| {
//!     res.end("hello");
//!     Ok(())
//! });
//! let echo = task(|res, _req| async move {
//!     let body = res.get_data().await;
//!     res.end(body);
//!     Ok(())
//! });
//! assert!(!hello.is_task());
//! assert!(echo.is_task());
//! ```

use std::future::Future;

use rivet_core::callback::{Callback, HandlerResult};
use rivet_core::transport::{MethodFilter, RouteId, UpgradeContext};
use rivet_ws::WsBehavior;

use crate::request::Request;
use crate::response::Response;

/// Arguments of an HTTP route handler.
pub type HttpArgs = (Response, Request);

/// Arguments of a WebSocket upgrade handler.
pub type UpgradeArgs = (Response, Request, UpgradeContext);

/// An HTTP route handler.
pub type HttpHandler = Callback<HttpArgs>;

/// Behavior of a WebSocket route.
pub type WsRoute = WsBehavior<UpgradeArgs>;

/// Wraps a synchronous route handler.
pub fn handler<F>(f: F) -> HttpHandler
where
    F: Fn(Response, Request) -> HandlerResult + 'static,
{
    Callback::sync(move |(res, req): HttpArgs| f(res, req))
}

/// Wraps an async route handler. Its future runs on the app scheduler.
pub fn task<F, Fut>(f: F) -> HttpHandler
where
    F: Fn(Response, Request) -> Fut + 'static,
    Fut: Future<Output = HandlerResult> + 'static,
{
    Callback::task(move |(res, req): HttpArgs| f(res, req))
}

/// Wraps a synchronous upgrade handler.
pub fn upgrade_handler<F>(f: F) -> Callback<UpgradeArgs>
where
    F: Fn(Response, Request, UpgradeContext) -> HandlerResult + 'static,
{
    Callback::sync(move |(res, req, ctx): UpgradeArgs| f(res, req, ctx))
}

/// Wraps an async upgrade handler.
pub fn upgrade_task<F, Fut>(f: F) -> Callback<UpgradeArgs>
where
    F: Fn(Response, Request, UpgradeContext) -> Fut + 'static,
    Fut: Future<Output = HandlerResult> + 'static,
{
    Callback::task(move |(res, req, ctx): UpgradeArgs| f(res, req, ctx))
}

#[derive(Clone)]
pub(crate) enum Route {
    Http(HttpHandler),
    Ws(WsRoute),
}

/// Registered routes, indexed by [`RouteId`].
#[derive(Clone, Default)]
pub(crate) struct RouteTable {
    routes: Vec<(String, Route)>,
}

impl RouteTable {
    pub(crate) fn add_http(&mut self, method: &MethodFilter, pattern: &str, handler: HttpHandler) -> RouteId {
        let id = RouteId(self.routes.len());
        let label = match method {
            MethodFilter::Any => format!("* {pattern}"),
            MethodFilter::Only(m) => format!("{m} {pattern}"),
        };
        self.routes.push((label, Route::Http(handler)));
        id
    }

    pub(crate) fn add_ws(&mut self, pattern: &str, behavior: WsRoute) -> RouteId {
        let id = RouteId(self.routes.len());
        self.routes.push((format!("WS {pattern}"), Route::Ws(behavior)));
        id
    }

    pub(crate) fn http(&self, id: RouteId) -> Option<HttpHandler> {
        match self.routes.get(id.0) {
            Some((_, Route::Http(handler))) => Some(handler.clone()),
            _ => None,
        }
    }

    pub(crate) fn ws(&self, id: RouteId) -> Option<&WsRoute> {
        match self.routes.get(id.0) {
            Some((_, Route::Ws(behavior))) => Some(behavior),
            _ => None,
        }
    }

    pub(crate) fn label(&self, id: RouteId) -> Option<&str> {
        self.routes.get(id.0).map(|(label, _)| label.as_str())
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn test_ids_follow_registration_order() {
        let mut table = RouteTable::default();
        let a = table.add_http(&MethodFilter::Only(Method::GET), "/", handler(|_, _| Ok(())));
        let b = table.add_ws("/ws", WsRoute::new());
        let c = table.add_http(&MethodFilter::Any, "/*", task(|_, _| async { Ok(()) }));

        assert_eq!((a, b, c), (RouteId(0), RouteId(1), RouteId(2)));
        assert_eq!(table.len(), 3);
        assert_eq!(table.label(a), Some("GET /"));
        assert_eq!(table.label(c), Some("* /*"));
    }

    #[test]
    fn test_lookup_by_kind() {
        let mut table = RouteTable::default();
        let http = table.add_http(&MethodFilter::Any, "/", handler(|_, _| Ok(())));
        let ws = table.add_ws("/ws", WsRoute::new().idle_timeout(10));

        assert!(table.http(http).is_some());
        assert!(table.ws(http).is_none());
        assert_eq!(table.ws(ws).map(|b| b.options().idle_timeout), Some(10));
        assert!(table.http(RouteId(9)).is_none());
    }
}
