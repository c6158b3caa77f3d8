//! # Rivet WebSocket
//!
//! The WebSocket session layer: pooled [`Connection`] wrappers, per-route
//! [`WsBehavior`], pub/sub through the engine and the user-data
//! association created at upgrade time.
//!
//! Frame parsing, compression, idle timeouts and the pub/sub fan-out
//! itself belong to the transport engine. This crate only shapes the
//! application-facing surface over it.

#![doc(html_root_url = "https://docs.rs/rivet-ws/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod behavior;
pub mod connection;
pub mod message;
pub mod user_data;

pub use behavior::{CloseArgs, SubscriptionArgs, WsBehavior};
pub use connection::{Connection, ConnectionState, WsContext};
pub use message::{CloseCode, Message};
pub use rivet_core::transport::{CompressOptions, OpCode, SendStatus};
pub use user_data::{UserDataGuard, UserDataMap};
