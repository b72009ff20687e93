//! Core infrastructure for redis-heimdall.
//!
//! This crate holds what every heimdall component shares:
//!
//! - [`error`]: the closed set of failure [`Reason`]s and the caller facing
//!   [`Error`] type
//! - [`transport`]: the contract heimdall drives (create a client, connect,
//!   send, batch, close, failure handlers)
//! - [`events`]: listener plumbing for component events
//! - `memory` (feature `test-util`): an in-memory server implementing the
//!   transport contract, used by tests, benches and demos

pub mod error;
pub mod events;
#[cfg(feature = "test-util")]
pub mod memory;
pub mod transport;

pub use error::{Cause, Error, HeimdallError, Reason};
pub use events::{EventListener, EventListeners, FnListener, HeimdallEvent};
pub use transport::{
    Command, EndHandler, ExceptionHandler, MessageHandler, RedisError, Request, Response,
    Transport, TransportClient, TransportConnection, TransportError,
};

/// Boxed future returned by clients and connections.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;
