//! Engine event dispatch.
//!
//! The [`Dispatcher`] is the app's [`EventSink`]. For every engine event it
//! acquires the wrappers the handler needs, runs the handler inline or as a
//! task, sends failures to the error pipeline and releases the wrappers
//! once the handler is done with them.
//!
//! No `RefCell` borrow is held while a handler runs, so handlers may call
//! back into the app and the engine freely.

use std::cell::RefCell;
use std::rc::Rc;

use futures_util::FutureExt;
use rivet_core::callback::{Callback, Invocation};
use rivet_core::transport::{
    EventSink, NativeRequest, NativeResponse, NativeSocket, OpCode, RouteId, Token, UpgradeContext,
};
use rivet_telemetry::metrics;
use rivet_ws::{Connection, Message, UserDataGuard};
use tracing::{debug, warn};

use crate::context::Shared;
use crate::error_handler::ErrorSource;
use crate::request::Request;
use crate::response::Response;
use crate::routes::{RouteTable, WsRoute};

pub(crate) struct Dispatcher {
    shared: Rc<Shared>,
    routes: Rc<RefCell<RouteTable>>,
    missing_server_name: RefCell<Option<Callback<String>>>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Rc<Shared>, routes: Rc<RefCell<RouteTable>>) -> Self {
        Self {
            shared,
            routes,
            missing_server_name: RefCell::new(None),
        }
    }

    pub(crate) fn set_missing_server_name(&self, handler: Option<Callback<String>>) {
        *self.missing_server_name.borrow_mut() = handler;
    }

    fn ws_handler<A>(
        &self,
        route: RouteId,
        pick: impl FnOnce(&WsRoute) -> Option<&Callback<A>>,
    ) -> Option<Callback<A>> {
        self.routes.borrow().ws(route).and_then(pick).cloned()
    }

    /// Drives an HTTP or upgrade handler invocation to completion.
    fn run_request(&self, invocation: Invocation, res: Response, req: Request) {
        match invocation {
            Invocation::Done(Ok(())) => res.finish_dispatch(),
            Invocation::Done(Err(e)) => {
                match self
                    .shared
                    .errors
                    .invoke(ErrorSource::Request, e, Some(res.clone()), Some(req))
                {
                    None => res.finish_dispatch(),
                    Some(rest) => {
                        let done = res.clone();
                        let task = self.shared.scheduler.run_async(
                            async move {
                                rest.await;
                                done.finish_dispatch();
                            },
                            Some(&res),
                        );
                        res.store_task(task);
                    }
                }
            }
            Invocation::Pending(fut) => {
                let shared = Rc::clone(&self.shared);
                let done = res.clone();
                let task = self.shared.scheduler.run_async(
                    async move {
                        if let Err(e) = fut.await {
                            let rest = shared.errors.invoke(
                                ErrorSource::Request,
                                e,
                                Some(done.clone()),
                                Some(req),
                            );
                            if let Some(rest) = rest {
                                rest.await;
                            }
                        }
                        done.finish_dispatch();
                    },
                    Some(&res),
                );
                res.store_task(task);
            }
        }
        metrics::set_in_flight_tasks(self.shared.scheduler.in_flight());
    }

    /// Runs a WebSocket handler and releases the connection wrapper after
    /// it. `guard`, if any, is dropped at the same point.
    fn run_ws<A: 'static>(
        &self,
        conn: Connection,
        handler: Option<Callback<A>>,
        args: A,
        guard: Option<UserDataGuard>,
    ) {
        let Some(handler) = handler else {
            self.shared.ws.release(&conn);
            drop(guard);
            return;
        };
        match handler.invoke(args) {
            Invocation::Done(result) => {
                if let Err(e) = result {
                    self.shared.report(ErrorSource::WebSocket, e, None, None);
                }
                self.shared.ws.release(&conn);
                drop(guard);
            }
            Invocation::Pending(fut) => {
                let shared = Rc::clone(&self.shared);
                self.shared.spawn(
                    async move {
                        let _guard = guard;
                        if let Err(e) = fut.await {
                            if let Some(rest) =
                                shared.errors.invoke(ErrorSource::WebSocket, e, None, None)
                            {
                                rest.await;
                            }
                        }
                        shared.ws.release(&conn);
                    }
                    .boxed_local(),
                );
            }
        }
    }
}

impl EventSink for Dispatcher {
    fn on_request(
        &self,
        route: RouteId,
        response: Rc<dyn NativeResponse>,
        request: Rc<dyn NativeRequest>,
    ) {
        let handler = self.routes.borrow().http(route);
        let Some(handler) = handler else {
            warn!(route = %route, "request for unknown route");
            response.write_status("404 Not Found");
            response.end_without_body(false);
            return;
        };
        let (res, req) = self.shared.acquire_pair(response, request);
        debug!(
            route = self.routes.borrow().label(route).unwrap_or_default(),
            token = %res.token(),
            "dispatch request"
        );
        let invocation = handler.invoke((res.clone(), req.clone()));
        self.run_request(invocation, res, req);
    }

    fn on_upgrade(
        &self,
        route: RouteId,
        response: Rc<dyn NativeResponse>,
        request: Rc<dyn NativeRequest>,
        context: UpgradeContext,
    ) {
        let upgrade = self
            .routes
            .borrow()
            .ws(route)
            .map(|behavior| behavior.upgrade_handler().cloned());
        let Some(upgrade) = upgrade else {
            warn!(route = %route, "upgrade for unknown route");
            response.write_status("404 Not Found");
            response.end_without_body(false);
            return;
        };
        let (res, req) = self.shared.acquire_pair(response, request);
        debug!(route = %route, token = %res.token(), "dispatch upgrade");
        match upgrade {
            Some(handler) => {
                let invocation = handler.invoke((res.clone(), req.clone(), context));
                self.run_request(invocation, res, req);
            }
            None => {
                let key = req.header("sec-websocket-key").unwrap_or_default();
                let protocol = req.header("sec-websocket-protocol").unwrap_or_default();
                let extensions = req.header("sec-websocket-extensions").unwrap_or_default();
                res.upgrade(&key, &protocol, &extensions, context);
                res.finish_dispatch();
            }
        }
    }

    fn on_data(&self, token: Token, chunk: &[u8], is_end: bool) {
        if let Some(res) = Response::resolve(&self.shared, token) {
            res.handle_data(chunk, is_end);
        }
    }

    fn on_writable(&self, token: Token, offset: u64) -> bool {
        Response::resolve(&self.shared, token).map_or(true, |res| res.handle_writable(offset))
    }

    fn on_aborted(&self, token: Token) {
        match Response::resolve(&self.shared, token) {
            Some(res) => res.abort(),
            None => debug!(token = %token, "abort for released response ignored"),
        }
    }

    fn on_ws_open(&self, route: RouteId, socket: Rc<dyn NativeSocket>) {
        let handler = self.ws_handler(route, WsRoute::open_handler);
        let conn = self.shared.ws.acquire(socket);
        self.run_ws(conn.clone(), handler, conn, None);
    }

    fn on_ws_message(
        &self,
        route: RouteId,
        socket: Rc<dyn NativeSocket>,
        payload: &[u8],
        opcode: OpCode,
    ) {
        let handler = self.ws_handler(route, WsRoute::message_handler);
        let conn = self.shared.ws.acquire(socket);
        let message = Message::from_frame(payload, opcode);
        self.run_ws(conn.clone(), handler, (conn, message), None);
    }

    fn on_ws_drain(&self, route: RouteId, socket: Rc<dyn NativeSocket>) {
        let handler = self.ws_handler(route, WsRoute::drain_handler);
        let conn = self.shared.ws.acquire(socket);
        self.run_ws(conn.clone(), handler, conn, None);
    }

    fn on_ws_ping(&self, route: RouteId, socket: Rc<dyn NativeSocket>, payload: &[u8]) {
        let handler = self.ws_handler(route, WsRoute::ping_handler);
        let conn = self.shared.ws.acquire(socket);
        let payload = bytes::Bytes::copy_from_slice(payload);
        self.run_ws(conn.clone(), handler, (conn, payload), None);
    }

    fn on_ws_pong(&self, route: RouteId, socket: Rc<dyn NativeSocket>, payload: &[u8]) {
        let handler = self.ws_handler(route, WsRoute::pong_handler);
        let conn = self.shared.ws.acquire(socket);
        let payload = bytes::Bytes::copy_from_slice(payload);
        self.run_ws(conn.clone(), handler, (conn, payload), None);
    }

    fn on_ws_close(&self, route: RouteId, socket: Rc<dyn NativeSocket>, code: u16, reason: &[u8]) {
        let handler = self.ws_handler(route, WsRoute::close_handler);
        let guard = UserDataGuard::new(self.shared.user_data(), socket.user_data());
        let conn = self.shared.ws.acquire(socket);
        conn.prefetch_user_data();
        debug!(route = %route, code, "websocket closed");
        let reason = bytes::Bytes::copy_from_slice(reason);
        self.run_ws(conn.clone(), handler, (conn, code, reason), Some(guard));
    }

    fn on_ws_subscription(
        &self,
        route: RouteId,
        socket: Rc<dyn NativeSocket>,
        topic: &str,
        new_count: u32,
        old_count: u32,
    ) {
        let handler = self.ws_handler(route, WsRoute::subscription_handler);
        let conn = self.shared.ws.acquire(socket);
        let args = (conn.clone(), topic.to_string(), new_count, old_count);
        self.run_ws(conn, handler, args, None);
    }

    fn on_missing_server_name(&self, hostname: &str) {
        let handler = self.missing_server_name.borrow().clone();
        if let Some(handler) = handler {
            match handler.invoke(hostname.to_string()) {
                Invocation::Done(Ok(())) => {}
                Invocation::Done(Err(e)) => {
                    self.shared.report(ErrorSource::Lifecycle, e, None, None);
                }
                Invocation::Pending(fut) => {
                    let shared = Rc::clone(&self.shared);
                    self.shared.spawn(
                        async move {
                            if let Err(e) = fut.await {
                                shared.report(ErrorSource::Lifecycle, e, None, None);
                            }
                        }
                        .boxed_local(),
                    );
                }
            }
        }
    }
}
