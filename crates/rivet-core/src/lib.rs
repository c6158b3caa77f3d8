//! # Rivet Core
//!
//! Runtime primitives shared by every Rivet crate:
//!
//! - [`transport`] - the interface a native, callback-driven engine implements
//! - [`pool`] - generation-checked object pools for per-request wrappers
//! - [`extension`] - properties, methods and capabilities added to wrappers
//! - [`scheduler`] - the single-threaded bridge from engine callbacks to tasks
//! - [`callback`] - handlers that are either synchronous or task factories
//! - [`lifecycle`] and [`shutdown`] - start/stop hooks and the stop signal
//! - [`RivetError`] - errors the layer itself reports

#![doc(html_root_url = "https://docs.rs/rivet-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod callback;
mod error;
pub mod extension;
pub mod lifecycle;
pub mod pool;
pub mod scheduler;
pub mod shutdown;
pub mod transport;

pub use callback::{Callback, HandlerResult, Invocation};
pub use error::{RivetError, RivetResult};
pub use extension::{Extensible, ExtensionDescriptor, Extensions};
pub use lifecycle::Lifecycle;
pub use pool::{Pool, PoolStats, Poolable, Pooled};
pub use scheduler::{AbortGuard, IdleFlag, Scheduler, TaskHandle};
pub use shutdown::ShutdownSignal;
pub use transport::{
    CompressOptions, Engine, EventSink, ListenInfo, ListenOptions, MethodFilter, NativeRequest,
    NativeResponse, NativeSocket, OpCode, PollMode, RouteId, SendStatus, Token, UpgradeContext,
    WsRouteOptions,
};
