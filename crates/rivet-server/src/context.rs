//! State shared by the app, the dispatcher and every wrapper.

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use rivet_core::pool::Pool;
use rivet_core::scheduler::{IdleFlag, Scheduler};
use rivet_core::transport::{Engine, NativeRequest, NativeResponse};
use rivet_telemetry::metrics::{self, AcquireSource};
use rivet_ws::{UserDataMap, WsContext};

use crate::error_handler::{ErrorPipeline, ErrorSource};
use crate::options::AppOptions;
use crate::request::{Request, RequestState};
use crate::response::{Response, ResponseState};

pub(crate) struct Shared {
    pub(crate) engine: Rc<dyn Engine>,
    pub(crate) scheduler: Scheduler,
    pub(crate) idle: IdleFlag,
    pub(crate) requests: Pool<RequestState>,
    pub(crate) responses: Pool<ResponseState>,
    pub(crate) ws: Rc<WsContext>,
    pub(crate) errors: ErrorPipeline,
}

impl Shared {
    pub(crate) fn new(engine: Rc<dyn Engine>, scheduler: Scheduler, options: &AppOptions) -> Rc<Self> {
        let idle = scheduler.idle();
        let ws = WsContext::new(
            Rc::clone(&engine),
            idle.clone(),
            options.websocket_pool(),
            UserDataMap::new(),
        );
        Rc::new(Self {
            engine,
            scheduler,
            idle,
            requests: Pool::new("request", options.request_pool()),
            responses: Pool::new("response", options.response_pool()),
            ws,
            errors: ErrorPipeline::new(),
        })
    }

    pub(crate) fn user_data(&self) -> &UserDataMap {
        self.ws.user_data()
    }

    /// Wraps one native request/response pair. The response keeps the
    /// request so both go back to their pools together.
    pub(crate) fn acquire_pair(
        self: &Rc<Self>,
        res: Rc<dyn NativeResponse>,
        req: Rc<dyn NativeRequest>,
    ) -> (Response, Request) {
        let req = self.requests.acquire(req);
        record(self.requests.kind(), req.is_returnable());
        let res = self.responses.acquire(res);
        record(self.responses.kind(), res.is_returnable());

        let request = Request::from_handle(req);
        let response = Response::from_handle(res, Rc::clone(self));
        response.pair(&request);
        (response, request)
    }

    /// Routes an error through the pipeline and schedules whatever is left
    /// of it.
    pub(crate) fn report(
        &self,
        source: ErrorSource,
        error: anyhow::Error,
        res: Option<Response>,
        req: Option<Request>,
    ) {
        if let Some(rest) = self.errors.invoke(source, error, res, req) {
            self.spawn(rest);
        }
    }

    pub(crate) fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.scheduler.spawn(task);
        metrics::set_in_flight_tasks(self.scheduler.in_flight());
    }
}

fn record(kind: &'static str, returnable: bool) {
    let source = if returnable {
        AcquireSource::Pooled
    } else {
        AcquireSource::Transient
    };
    metrics::record_acquire(kind, source);
}
