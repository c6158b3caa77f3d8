//! Start and shutdown hooks.
//!
//! # Execution order
//!
//! - **Startup hooks** run in registration order before the engine listens.
//! - **Shutdown hooks** run in reverse registration order after the reactor
//!   has stopped and the run queue has drained.
//!
//! A failing hook does not stop the others. Its error, with the hook name
//! attached as context, is handed to the caller-supplied error sink, which
//! is the application's error pipeline without a request in scope.

use std::fmt;
use std::future::Future;

use anyhow::Context as _;
use tracing::debug;

use crate::callback::{Callback, HandlerResult};

/// Registered lifecycle hooks.
#[derive(Clone, Default)]
pub struct Lifecycle {
    startup_hooks: Vec<(String, Callback<()>)>,
    shutdown_hooks: Vec<(String, Callback<()>)>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("startup_hooks", &self.startup_hooks.len())
            .field("shutdown_hooks", &self.shutdown_hooks.len())
            .finish()
    }
}

impl Lifecycle {
    /// Creates an empty lifecycle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a startup hook named `startup_<n>`.
    pub fn on_startup(&mut self, hook: Callback<()>) -> &mut Self {
        let name = format!("startup_{}", self.startup_hooks.len());
        self.on_startup_named(name, hook)
    }

    /// Adds a named startup hook.
    pub fn on_startup_named(&mut self, name: impl Into<String>, hook: Callback<()>) -> &mut Self {
        self.startup_hooks.push((name.into(), hook));
        self
    }

    /// Adds a shutdown hook named `shutdown_<n>`.
    pub fn on_shutdown(&mut self, hook: Callback<()>) -> &mut Self {
        let name = format!("shutdown_{}", self.shutdown_hooks.len());
        self.on_shutdown_named(name, hook)
    }

    /// Adds a named shutdown hook.
    pub fn on_shutdown_named(&mut self, name: impl Into<String>, hook: Callback<()>) -> &mut Self {
        self.shutdown_hooks.push((name.into(), hook));
        self
    }

    /// Number of startup hooks.
    pub fn startup_hook_count(&self) -> usize {
        self.startup_hooks.len()
    }

    /// Number of shutdown hooks.
    pub fn shutdown_hook_count(&self) -> usize {
        self.shutdown_hooks.len()
    }

    /// Runs startup hooks in order, awaiting tasks. Returns the number that failed.
    pub async fn run_startup<E>(&self, on_error: E) -> usize
    where
        E: Fn(anyhow::Error),
    {
        run_hooks(self.startup_hooks.iter(), "startup", &on_error).await
    }

    /// Runs shutdown hooks in reverse order. Returns the number that failed.
    pub async fn run_shutdown<E>(&self, on_error: E) -> usize
    where
        E: Fn(anyhow::Error),
    {
        run_hooks(self.shutdown_hooks.iter().rev(), "shutdown", &on_error).await
    }

    /// Appends the other lifecycle's hooks to this one.
    pub fn merge(&mut self, other: Lifecycle) -> &mut Self {
        self.startup_hooks.extend(other.startup_hooks);
        self.shutdown_hooks.extend(other.shutdown_hooks);
        self
    }
}

async fn run_hooks<'a, I, E>(hooks: I, phase: &'static str, on_error: &E) -> usize
where
    I: Iterator<Item = &'a (String, Callback<()>)>,
    E: Fn(anyhow::Error),
{
    let mut failed = 0;
    for (name, hook) in hooks {
        debug!(hook = %name, phase, "running lifecycle hook");
        let result: HandlerResult = hook.call(()).await;
        if let Err(e) = result.with_context(|| format!("{phase} hook `{name}` failed")) {
            failed += 1;
            on_error(e);
        }
    }
    failed
}

/// Convenience for building a task hook from an async closure.
pub fn hook_task<F, Fut>(f: F) -> Callback<()>
where
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = HandlerResult> + 'static,
{
    Callback::task(move |()| f())
}
