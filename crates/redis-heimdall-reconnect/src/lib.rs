//! Reconnect engine for redis-heimdall.
//!
//! When a supervised client loses its server, a [`ReconnectProcess`] builds a
//! brand-new transport client for the same endpoints, connects, and verifies
//! it with a `PING`/`PONG` liveness probe. Failed attempts are retried after a
//! pause given by the [`ReconnectPolicy`] until a probe succeeds or the attempt
//! budget of the episode is used up.
//!
//! # Features
//!
//! - **Fixed interval by default**: 2 seconds between attempts, exponential and
//!   jittered policies on request
//! - **Bounded or unbounded**: `max_attempts(n)` per episode, `0` for unlimited
//! - **Lock-free state**: [`ReconnectState`] admits exactly one episode at a time
//! - **Events**: attempt failed, restored and gave up
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use redis_heimdall_core::memory::MemoryServer;
//! use redis_heimdall_reconnect::{ReconnectConfig, ReconnectProcess, ReconnectState};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = ReconnectConfig::builder()
//!     .name("cache")
//!     .interval(Duration::from_millis(100))
//!     .max_attempts(5)
//!     .build();
//!
//! let process = ReconnectProcess::new(
//!     Arc::new(MemoryServer::new()),
//!     vec!["redis://localhost:6379".to_string()],
//!     config,
//! );
//! let client = process.start(&ReconnectState::new()).await.unwrap();
//! # drop(client);
//! # }
//! ```

mod backoff;
mod config;
mod events;
mod policy;
mod process;
mod state;

pub use backoff::{
    ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, FnInterval, IntervalFunction,
};
pub use config::{ReconnectConfig, ReconnectConfigBuilder};
pub use events::ReconnectEvent;
pub use policy::{ReconnectPolicy, DEFAULT_RECONNECT_INTERVAL};
pub use process::{probe, IntervalProcess, ProbeError, ReconnectProcess, PONG};
pub use state::{ConnectionState, ReconnectState};
