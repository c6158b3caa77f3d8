//! The application: routes, hooks, pools and the reactor loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use rivet_server::routes::handler;
//! use rivet_server::App;
//!
//! let mut app = App::new(engine)?;
//! app.get("/", handler(|res, _req| {
//!     res.end("hello word");
//!     Ok(())
//! }));
//! app.listen(3000_u16, |info| println!("listening on {}", info.port))?;
//! app.run()?;
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use http::Method;
use rivet_config::RivetConfig;
use rivet_core::callback::{Callback, HandlerResult};
use rivet_core::extension::ExtensionDescriptor;
use rivet_core::lifecycle::{hook_task, Lifecycle};
use rivet_core::pool::PoolStats;
use rivet_core::scheduler::Scheduler;
use rivet_core::shutdown::ShutdownSignal;
use rivet_core::transport::{
    Engine, EventSink, ListenInfo, ListenOptions, MethodFilter, OpCode, PollMode,
};
use rivet_core::{RivetError, RivetResult};
use rivet_ws::{Connection, UserDataMap};
use tokio::runtime::Runtime;
use tracing::{debug, error, info, warn};

use crate::context::Shared;
use crate::dispatch::Dispatcher;
use crate::error_handler::{ErrorArgs, ErrorSource};
use crate::options::AppOptions;
use crate::request::Request;
use crate::response::Response;
use crate::routes::{HttpHandler, RouteTable, WsRoute};

/// Extension descriptors for the three wrapper kinds.
///
/// Filled in through [`App::register`].
#[derive(Default)]
pub struct AppExtension {
    request: ExtensionDescriptor<Request>,
    response: ExtensionDescriptor<Response>,
    websocket: ExtensionDescriptor<Connection>,
}

impl AppExtension {
    /// Additions for every [`Request`].
    pub fn request(&mut self) -> &mut ExtensionDescriptor<Request> {
        &mut self.request
    }

    /// Additions for every [`Response`].
    pub fn response(&mut self) -> &mut ExtensionDescriptor<Response> {
        &mut self.response
    }

    /// Additions for every WebSocket [`Connection`].
    pub fn websocket(&mut self) -> &mut ExtensionDescriptor<Connection> {
        &mut self.websocket
    }
}

impl fmt::Debug for AppExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppExtension")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("websocket", &self.websocket)
            .finish()
    }
}

/// A Rivet application bound to one engine.
///
/// Owns the single-threaded runtime that handler tasks run on. Everything
/// happens on the thread that created the app.
pub struct App {
    shared: Rc<Shared>,
    dispatcher: Rc<Dispatcher>,
    routes: Rc<RefCell<RouteTable>>,
    runtime: Runtime,
    lifecycle: Lifecycle,
    extension: AppExtension,
    shutdown: ShutdownSignal,
    options: AppOptions,
    started: Cell<bool>,
    listening: RefCell<Option<ListenInfo>>,
}

impl App {
    /// Creates an app with default options.
    pub fn new(engine: Rc<dyn Engine>) -> RivetResult<Self> {
        Self::with_options(engine, AppOptions::default())
    }

    /// Creates an app from loaded configuration.
    pub fn from_config(engine: Rc<dyn Engine>, config: &RivetConfig) -> RivetResult<Self> {
        Self::with_options(engine, AppOptions::from_config(config))
    }

    /// Creates an app with the given options.
    pub fn with_options(engine: Rc<dyn Engine>, options: AppOptions) -> RivetResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let scheduler = Scheduler::with_idle_wait(options.idle_wait());
        let shared = Shared::new(engine, scheduler, &options);
        let routes = Rc::new(RefCell::new(RouteTable::default()));
        let dispatcher = Rc::new(Dispatcher::new(Rc::clone(&shared), Rc::clone(&routes)));

        let sink: Rc<dyn EventSink> = dispatcher.clone();
        shared.engine.attach(Rc::downgrade(&sink));
        debug!(
            request_pool = options.request_pool(),
            response_pool = options.response_pool(),
            websocket_pool = options.websocket_pool(),
            "app created"
        );

        Ok(Self {
            shared,
            dispatcher,
            routes,
            runtime,
            lifecycle: Lifecycle::new(),
            extension: AppExtension::default(),
            shutdown: ShutdownSignal::new(),
            options,
            started: Cell::new(false),
            listening: RefCell::new(None),
        })
    }

    /// The options the app was created with.
    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// The scheduler handler tasks run on.
    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    /// A handle that stops [`run`](Self::run) when triggered.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Registers an HTTP route.
    pub fn route(&mut self, method: MethodFilter, pattern: &str, handler: HttpHandler) -> &mut Self {
        let id = self.routes.borrow_mut().add_http(&method, pattern, handler);
        self.shared.engine.add_route(method, pattern, id);
        debug!(route = %id, pattern, "route registered");
        self
    }

    /// Registers a `GET` route.
    pub fn get(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::GET), pattern, handler)
    }

    /// Registers a `POST` route.
    pub fn post(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::POST), pattern, handler)
    }

    /// Registers a `PUT` route.
    pub fn put(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::PUT), pattern, handler)
    }

    /// Registers a `DELETE` route.
    pub fn delete(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::DELETE), pattern, handler)
    }

    /// Registers a `PATCH` route.
    pub fn patch(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::PATCH), pattern, handler)
    }

    /// Registers a `HEAD` route.
    pub fn head(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::HEAD), pattern, handler)
    }

    /// Registers an `OPTIONS` route.
    pub fn options_route(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::OPTIONS), pattern, handler)
    }

    /// Registers a `CONNECT` route.
    pub fn connect(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::CONNECT), pattern, handler)
    }

    /// Registers a `TRACE` route.
    pub fn trace(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Only(Method::TRACE), pattern, handler)
    }

    /// Registers a route for every method.
    pub fn any(&mut self, pattern: &str, handler: HttpHandler) -> &mut Self {
        self.route(MethodFilter::Any, pattern, handler)
    }

    /// A WebSocket behavior preloaded with the app's default limits.
    pub fn ws_behavior(&self) -> WsRoute {
        WsRoute::with_options(self.options.ws_defaults().clone())
    }

    /// Registers a WebSocket route.
    pub fn ws(&mut self, pattern: &str, behavior: WsRoute) -> &mut Self {
        let options = behavior.options().clone();
        let id = self.routes.borrow_mut().add_ws(pattern, behavior);
        self.shared.engine.add_ws_route(pattern, &options, id);
        debug!(route = %id, pattern, "websocket route registered");
        self
    }

    /// Broadcasts to every subscriber of `topic`.
    pub fn publish(
        &self,
        topic: &str,
        message: impl AsRef<[u8]>,
        opcode: OpCode,
        compress: bool,
    ) -> bool {
        self.shared.ws.publish(topic, message.as_ref(), opcode, compress)
    }

    /// Number of sockets subscribed to `topic`.
    pub fn num_subscribers(&self, topic: &str) -> u32 {
        self.shared.ws.num_subscribers(topic)
    }

    /// Adds a startup hook, run before the engine listens.
    pub fn on_start(&mut self, hook: Callback<()>) -> &mut Self {
        self.lifecycle.on_startup(hook);
        self
    }

    /// Adds an async startup hook.
    pub fn on_start_task<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.on_start(hook_task(hook))
    }

    /// Adds a shutdown hook, run after the reactor stops.
    pub fn on_shutdown(&mut self, hook: Callback<()>) -> &mut Self {
        self.lifecycle.on_shutdown(hook);
        self
    }

    /// Adds an async shutdown hook.
    pub fn on_shutdown_task<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.on_shutdown(hook_task(hook))
    }

    /// Replaces the default error handler with a synchronous one.
    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Rc<anyhow::Error>, Option<Response>, Option<Request>) -> HandlerResult + 'static,
    {
        self.set_error_handler(Callback::sync(move |(error, res, req): ErrorArgs| {
            handler(error, res, req)
        }))
    }

    /// Replaces the default error handler with an async one.
    pub fn on_error_task<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Rc<anyhow::Error>, Option<Response>, Option<Request>) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.set_error_handler(Callback::task(move |(error, res, req): ErrorArgs| {
            handler(error, res, req)
        }))
    }

    /// Installs a prebuilt error handler.
    pub fn set_error_handler(&mut self, handler: Callback<ErrorArgs>) -> &mut Self {
        self.shared.errors.set_handler(Some(handler));
        self
    }

    /// Adds properties, methods and capabilities to the wrapper kinds.
    ///
    /// May be called more than once; additions accumulate. Free pooled
    /// wrappers pick up the result immediately, borrowed ones when they
    /// are released.
    pub fn register(&mut self, extension: impl FnOnce(&mut AppExtension)) -> &mut Self {
        extension(&mut self.extension);
        self.shared
            .requests
            .set_extension(Some(self.extension.request.clone().freeze()));
        self.shared
            .responses
            .set_extension(Some(self.extension.response.clone().freeze()));
        self.shared
            .ws
            .pool()
            .set_extension(Some(self.extension.websocket.clone().freeze()));
        self
    }

    /// Registers a TLS server name with the engine.
    pub fn add_server_name(&mut self, hostname: &str) -> &mut Self {
        self.shared.engine.add_server_name(hostname);
        self
    }

    /// Removes a TLS server name from the engine.
    pub fn remove_server_name(&mut self, hostname: &str) -> &mut Self {
        self.shared.engine.remove_server_name(hostname);
        self
    }

    /// Handles TLS clients asking for an unregistered server name.
    pub fn missing_server_name(&mut self, handler: Callback<String>) -> &mut Self {
        self.dispatcher.set_missing_server_name(Some(handler));
        self
    }

    /// Fills every pool up to its capacity. Returns the wrappers created.
    pub fn populate(&self) -> usize {
        let created = self.shared.requests.populate()
            + self.shared.responses.populate()
            + self.shared.ws.pool().populate();
        debug!(created, "pools populated");
        created
    }

    /// Request pool counters.
    pub fn request_pool_stats(&self) -> PoolStats {
        self.shared.requests.stats()
    }

    /// Response pool counters.
    pub fn response_pool_stats(&self) -> PoolStats {
        self.shared.responses.stats()
    }

    /// Connection pool counters.
    pub fn websocket_pool_stats(&self) -> PoolStats {
        self.shared.ws.pool().stats()
    }

    /// Live WebSocket user-data associations.
    pub fn user_data(&self) -> &UserDataMap {
        self.shared.user_data()
    }

    /// Runs the startup hooks if they have not run yet.
    fn start(&self) {
        if self.started.replace(true) {
            return;
        }
        let shared = Rc::clone(&self.shared);
        let lifecycle = self.lifecycle.clone();
        let failed = self.block_on(async move {
            lifecycle
                .run_startup(|e| shared.report(ErrorSource::Lifecycle, e, None, None))
                .await
        });
        if failed > 0 {
            warn!(failed, "startup hooks failed");
        }
    }

    /// Runs the startup hooks, then starts listening.
    ///
    /// `handler` is called with the bound socket. A socket that cannot be
    /// bound is fatal.
    pub fn listen(
        &mut self,
        options: impl Into<ListenOptions>,
        handler: impl FnOnce(&ListenInfo),
    ) -> RivetResult<ListenInfo> {
        let options = options.into();
        self.start();
        let Some(info) = self.shared.engine.listen(&options) else {
            error!(host = %options.host, port = options.port, "failed to listen");
            return Err(RivetError::listen(options.host, options.port));
        };
        info!(host = %info.host, port = info.port, "listening");
        handler(&info);
        *self.listening.borrow_mut() = Some(info.clone());
        Ok(info)
    }

    /// [`listen`](Self::listen) with the options the app was created with.
    pub fn listen_default(&mut self, handler: impl FnOnce(&ListenInfo)) -> RivetResult<ListenInfo> {
        let options = self.options.listen().clone();
        self.listen(options, handler)
    }

    /// The socket the app is listening on.
    pub fn listen_info(&self) -> Option<ListenInfo> {
        self.listening.borrow().clone()
    }

    /// Serves until SIGINT, SIGTERM or [`close`](Self::close).
    ///
    /// On stop the listen socket is closed, queued tasks are drained and
    /// the shutdown hooks run, in that order.
    pub fn run(&mut self) -> RivetResult<()> {
        if self.listening.borrow().is_none() {
            return Err(RivetError::engine("run called before listen"));
        }
        self.populate();
        self.start();

        let shared = Rc::clone(&self.shared);
        let shutdown = self.shutdown.clone();
        let lifecycle = self.lifecycle.clone();
        self.block_on(async move {
            shutdown.listen_for_os_signals();
            shared.scheduler.drive(&*shared.engine, &shutdown).await;

            let failed = lifecycle
                .run_shutdown(|e| shared.report(ErrorSource::Lifecycle, e, None, None))
                .await;
            if failed > 0 {
                warn!(failed, "shutdown hooks failed");
            }
            shared.scheduler.drain(&*shared.engine).await;
        });
        info!("app stopped");
        Ok(())
    }

    /// Stops accepting connections and asks [`run`](Self::run) to return.
    pub fn close(&self) {
        info!("close requested");
        self.shared.engine.close();
        self.shutdown.trigger();
    }

    /// Runs `future` on the app's scheduler, driving handler tasks
    /// alongside it.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.shared.scheduler.block_on(&self.runtime, future)
    }

    /// One reactor iteration: dispatch ready engine events, then let ready
    /// tasks run once. Returns the number of events dispatched.
    pub fn poll_once(&self) -> usize {
        let engine = Rc::clone(&self.shared.engine);
        self.block_on(async move {
            let dispatched = engine.poll(PollMode::NoWait);
            tokio::task::yield_now().await;
            dispatched
        })
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("routes", &self.routes.borrow().len())
            .field("lifecycle", &self.lifecycle)
            .field("listening", &self.listening.borrow())
            .field("errors", &self.shared.errors)
            .finish_non_exhaustive()
    }
}
