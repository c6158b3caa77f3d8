//! Single-threaded task bridge between the engine and async handlers.
//!
//! The engine delivers events synchronously on one thread. Handlers that
//! need to wait (for a body, a drained send buffer, an application future)
//! run as tasks on a tokio [`LocalSet`] that shares that thread. The
//! reactor loop in [`Scheduler::drive`] alternates between polling the
//! engine and letting ready tasks run; nothing ever runs in parallel, so
//! per-request state lives in `Rc`/`RefCell`.
//!
//! # Idle tracking
//!
//! The engine cannot see work scheduled by application code. Every
//! operation that produces outbound traffic calls [`IdleFlag::mark_busy`];
//! the reactor only lets the engine wait for I/O when nothing has been
//! produced since the previous tick.
//!
//! # Example
//!
//! ```rust
//! use rivet_core::scheduler::Scheduler;
//!
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!     .enable_all()
//!     .build()
//!     .unwrap();
//! let scheduler = Scheduler::new();
//! let task = scheduler.spawn(async {
//!     tokio::task::yield_now().await;
//! });
//! assert_eq!(scheduler.in_flight(), 1);
//!
//! let finished = scheduler.block_on(&runtime, task.join());
//! assert!(finished);
//! assert_eq!(scheduler.in_flight(), 0);
//! ```

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::{JoinHandle, LocalSet};
use tracing::{debug, info};

use crate::shutdown::ShutdownSignal;
use crate::transport::{Engine, PollMode};

/// Default time the reactor waits for I/O while idle.
pub const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(1);

/// Ticks without progress after which draining gives up.
const DRAIN_STALL_TICKS: u32 = 16;

/// Shared "the reactor may block" flag.
#[derive(Clone)]
pub struct IdleFlag(Rc<Cell<bool>>);

impl IdleFlag {
    /// Creates a flag in the idle state.
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }

    /// `true` if no outbound work was produced since the last re-arm.
    pub fn is_idle(&self) -> bool {
        self.0.get()
    }

    /// Records that outbound work was produced.
    pub fn mark_busy(&self) {
        self.0.set(false);
    }

    /// Sets the flag back to idle and returns its previous value.
    pub fn rearm(&self) -> bool {
        self.0.replace(true)
    }
}

impl Default for IdleFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdleFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("IdleFlag").field(&self.0.get()).finish()
    }
}

/// Something that must hear about peer aborts before a task is scheduled.
pub trait AbortGuard {
    /// Registers the abort listener if it is not registered yet.
    fn grab_aborted_handler(&self);
}

/// Handle to a task spawned by [`Scheduler::run_async`].
pub struct TaskHandle {
    id: u64,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Scheduler-assigned task id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `true` once the task has completed.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the task at its next suspension point.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the task. Returns `false` if it was cancelled or panicked.
    pub async fn join(self) -> bool {
        self.handle.await.is_ok()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

struct InFlight(Rc<Cell<usize>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

struct SchedulerInner {
    local: LocalSet,
    idle: IdleFlag,
    in_flight: Rc<Cell<usize>>,
    next_id: Cell<u64>,
    idle_wait: Cell<Duration>,
}

/// Cooperative scheduler sharing the reactor thread.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Creates a scheduler with the default idle wait.
    pub fn new() -> Self {
        Self::with_idle_wait(DEFAULT_IDLE_WAIT)
    }

    /// Creates a scheduler that waits `idle_wait` for I/O while idle.
    pub fn with_idle_wait(idle_wait: Duration) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                local: LocalSet::new(),
                idle: IdleFlag::new(),
                in_flight: Rc::new(Cell::new(0)),
                next_id: Cell::new(1),
                idle_wait: Cell::new(idle_wait),
            }),
        }
    }

    /// The shared idle flag.
    pub fn idle(&self) -> IdleFlag {
        self.inner.idle.clone()
    }

    /// Changes the idle wait.
    pub fn set_idle_wait(&self, idle_wait: Duration) {
        self.inner.idle_wait.set(idle_wait);
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.get()
    }

    /// Schedules `task`, registering the guard's abort listener first.
    ///
    /// The listener must exist before control returns to the reactor: the
    /// peer may disconnect before the task first runs, and the abort
    /// listener is what resolves the task's pending futures.
    pub fn run_async<F>(&self, task: F, guard: Option<&dyn AbortGuard>) -> TaskHandle
    where
        F: Future<Output = ()> + 'static,
    {
        if let Some(guard) = guard {
            guard.grab_aborted_handler();
        }
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id.wrapping_add(1));
        self.inner.in_flight.set(self.inner.in_flight.get() + 1);
        let in_flight = InFlight(Rc::clone(&self.inner.in_flight));
        let handle = self.inner.local.spawn_local(async move {
            let _in_flight = in_flight;
            task.await;
        });
        TaskHandle { id, handle }
    }

    /// Schedules a task with no abort guard.
    pub fn spawn<F>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + 'static,
    {
        self.run_async(task, None)
    }

    /// Runs `future` to completion on `runtime` with this scheduler's tasks.
    pub fn block_on<F: Future>(&self, runtime: &Runtime, future: F) -> F::Output {
        self.inner.local.block_on(runtime, future)
    }

    /// Drives this scheduler's tasks while awaiting `future`.
    pub async fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.inner.local.run_until(future).await
    }

    /// Runs the reactor loop until `shutdown` fires, then closes the engine
    /// and drains the run queue.
    pub async fn drive(&self, engine: &dyn Engine, shutdown: &ShutdownSignal) {
        let idle = &self.inner.idle;
        while !shutdown.is_shutdown() {
            let idle_wait = self.inner.idle_wait.get();
            let was_idle = idle.rearm();
            let mode = if was_idle {
                PollMode::Wait(idle_wait)
            } else {
                PollMode::NoWait
            };
            let dispatched = engine.poll(mode);
            if dispatched == 0 && was_idle && idle.is_idle() {
                tokio::select! {
                    () = tokio::time::sleep(idle_wait) => {}
                    () = shutdown.recv() => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }
        info!("reactor stopping, closing listen sockets");
        engine.close();
        self.drain(engine).await;
    }

    /// Lets queued tasks run until none are left or none make progress.
    pub async fn drain(&self, engine: &dyn Engine) {
        let mut stalled = 0;
        while self.in_flight() > 0 && stalled < DRAIN_STALL_TICKS {
            let before = self.in_flight();
            let dispatched = engine.poll(PollMode::NoWait);
            tokio::task::yield_now().await;
            if dispatched == 0 && self.in_flight() >= before {
                stalled += 1;
            } else {
                stalled = 0;
            }
        }
        debug!(remaining = self.in_flight(), "run queue drained");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("idle", &self.inner.idle)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tokio::sync::oneshot;

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    struct Guard(Rc<Cell<u32>>);

    impl AbortGuard for Guard {
        fn grab_aborted_handler(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_idle_flag() {
        let flag = IdleFlag::new();
        assert!(flag.is_idle());
        flag.mark_busy();
        assert!(!flag.is_idle());
        assert!(!flag.rearm());
        assert!(flag.is_idle());
    }

    #[test]
    fn test_run_async_grabs_abort_handler_before_running() {
        let rt = runtime();
        let scheduler = Scheduler::new();
        let grabs = Rc::new(Cell::new(0));
        let seen = Rc::new(Cell::new(u32::MAX));

        let guard = Guard(Rc::clone(&grabs));
        let grabs_in_task = Rc::clone(&grabs);
        let seen_in_task = Rc::clone(&seen);
        let handle = scheduler.run_async(
            async move { seen_in_task.set(grabs_in_task.get()) },
            Some(&guard),
        );
        assert_eq!(grabs.get(), 1);
        assert_eq!(scheduler.in_flight(), 1);

        scheduler.block_on(&rt, async {
            assert!(handle.join().await);
        });
        assert_eq!(seen.get(), 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[test]
    fn test_tasks_interleave_at_await_points() {
        let rt = runtime();
        let scheduler = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (tx, rx) = oneshot::channel::<()>();

        let log_a = Rc::clone(&log);
        let a = scheduler.spawn(async move {
            log_a.borrow_mut().push("a:start");
            let _ = rx.await;
            log_a.borrow_mut().push("a:end");
        });
        let log_b = Rc::clone(&log);
        let b = scheduler.spawn(async move {
            log_b.borrow_mut().push("b");
            let _ = tx.send(());
        });

        scheduler.block_on(&rt, async {
            a.join().await;
            b.join().await;
        });
        assert_eq!(*log.borrow(), vec!["a:start", "b", "a:end"]);
    }

    #[test]
    fn test_task_ids_increase() {
        let scheduler = Scheduler::new();
        let a = scheduler.spawn(async {});
        let b = scheduler.spawn(async {});
        assert!(b.id() > a.id());
    }
}
