//! Synchronous and suspendable callbacks.
//!
//! Handlers registered with Rivet are either plain functions that run to
//! completion inside the engine callback, or task factories whose future is
//! spawned on the scheduler. [`Callback`] carries either form behind one type
//! so the dispatcher can decide per call.
//!
//! Panics are treated like errors: [`Callback::invoke`] and
//! [`catch_task`] turn them into [`RivetError::HandlerPanicked`] so a
//! misbehaving handler cannot unwind through the engine.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

use crate::error::RivetError;

/// Result returned by every application handler.
pub type HandlerResult = anyhow::Result<()>;

/// A handler that is either synchronous or a task factory.
pub enum Callback<A> {
    /// Runs to completion inside the engine callback.
    Sync(Rc<dyn Fn(A) -> HandlerResult>),
    /// Produces a future that is spawned on the scheduler.
    Task(Rc<dyn Fn(A) -> LocalBoxFuture<'static, HandlerResult>>),
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Rc::clone(f)),
            Self::Task(f) => Self::Task(Rc::clone(f)),
        }
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync(_) => "Callback::Sync",
            Self::Task(_) => "Callback::Task",
        })
    }
}

/// Outcome of invoking a [`Callback`].
pub enum Invocation {
    /// The synchronous handler finished.
    Done(HandlerResult),
    /// The task handler produced a future that still has to be driven.
    Pending(LocalBoxFuture<'static, HandlerResult>),
}

impl<A: 'static> Callback<A> {
    /// Wraps a synchronous handler.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(A) -> HandlerResult + 'static,
    {
        Self::Sync(Rc::new(f))
    }

    /// Wraps a task factory.
    pub fn task<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        Self::Task(Rc::new(move |args| f(args).boxed_local()))
    }

    /// `true` for task factories.
    pub fn is_task(&self) -> bool {
        matches!(self, Self::Task(_))
    }

    /// Calls the handler, converting a panic into an error.
    ///
    /// For task factories the returned future is already panic-guarded.
    pub fn invoke(&self, args: A) -> Invocation {
        match self {
            Self::Sync(f) => Invocation::Done(
                catch_unwind(AssertUnwindSafe(|| f(args))).unwrap_or_else(|p| Err(panic_error(&*p))),
            ),
            Self::Task(f) => match catch_unwind(AssertUnwindSafe(|| f(args))) {
                Ok(fut) => Invocation::Pending(catch_task(fut)),
                Err(p) => Invocation::Done(Err(panic_error(&*p))),
            },
        }
    }

    /// Calls the handler and awaits it if it is a task.
    pub async fn call(&self, args: A) -> HandlerResult {
        match self.invoke(args) {
            Invocation::Done(result) => result,
            Invocation::Pending(fut) => fut.await,
        }
    }
}

/// Guards a future so a panic while polling becomes an error.
pub fn catch_task<F>(fut: F) -> LocalBoxFuture<'static, HandlerResult>
where
    F: Future<Output = HandlerResult> + 'static,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .map(|outcome| outcome.unwrap_or_else(|p| Err(panic_error(&*p))))
        .boxed_local()
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> anyhow::Error {
    RivetError::handler_panicked(panic_message(payload)).into()
}
