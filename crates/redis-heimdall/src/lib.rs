//! Self-healing Redis clients.
//!
//! Heimdall watches the connections of a Redis client. When one is lost it
//! builds a new transport client, verifies it with a liveness probe and swaps
//! it in, while calls made meanwhile fail fast instead of piling up.
//!
//! # Features
//!
//! - **Pooled client** ([`Heimdall`]): a connection per command, handed back
//!   afterwards
//! - **Light client** ([`HeimdallLight`]): one pinned connection; commands
//!   issued before it exists are queued and sent in order
//! - **Subscription client** ([`HeimdallSubscription`]): channels and patterns
//!   are subscribed again after every reconnect
//! - **Classified errors**: every failure carries a [`Reason`]; only
//!   `CONNECTION_ISSUE` triggers a reconnect
//! - **Notifications**: reconnect start, success and failure published on the
//!   [`HeimdallContext`] bus
//! - **Tower**: the pooled and light clients are `tower::Service`s
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use redis_heimdall::{create_client, Client, HeimdallContext, HeimdallOptions};
//! use redis_heimdall_core::memory::MemoryServer;
//! use redis_heimdall_core::{Command, Request};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = HeimdallContext::new();
//!
//! let options = HeimdallOptions::builder()
//!     .name("sessions")
//!     .endpoint("redis://localhost:6379")
//!     .reconnect_interval(Duration::from_millis(500))
//!     .max_reconnect_attempts(20)
//!     .build();
//!
//! let client = create_client(&context, Arc::new(MemoryServer::new()), options);
//! let reply = client.send(Request::cmd(Command::PING)).await.unwrap();
//! assert_eq!(reply.as_string().as_deref(), Some("PONG"));
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics`: reconnect episode, outcome and rejection metrics through the
//!   `metrics` facade

mod client;
mod context;
mod guard;
mod light;
mod options;
mod pinned;
pub mod subscription;
mod supervisor;

use std::sync::Arc;

pub use client::{Client, Heimdall};
pub use context::{HeimdallContext, Notification, NotificationBus};
pub use guard::{GuardedConnection, HeimdallConnection};
pub use light::HeimdallLight;
pub use options::{
    HeimdallOptions, HeimdallOptionsBuilder, NotificationTopics, SubscriptionOptions,
    DEFAULT_ENDPOINT, DEFAULT_FAILED_TOPIC, DEFAULT_START_TOPIC, DEFAULT_SUCCEEDED_TOPIC,
};
pub use subscription::{
    HeimdallSubscription, SubscriptionConnection, SubscriptionMessage, SubscriptionRegistry,
    SubscriptionStore,
};
pub use supervisor::{BeforeReconnect, PostReconnectJob, Supervisor};

pub use redis_heimdall_core::{Error, HeimdallError, Reason};
pub use redis_heimdall_reconnect::{ConnectionState, ReconnectEvent, ReconnectPolicy};

use redis_heimdall_core::Transport;

/// Creates a pooled client.
pub fn create_client(
    context: &HeimdallContext,
    transport: Arc<dyn Transport>,
    options: HeimdallOptions,
) -> Heimdall {
    Heimdall::new(context, transport, options)
}

/// Creates a single connection client. Inside a Tokio runtime it starts
/// connecting right away.
pub fn create_light_client(
    context: &HeimdallContext,
    transport: Arc<dyn Transport>,
    options: HeimdallOptions,
) -> HeimdallLight {
    HeimdallLight::new(context, transport, options)
}

/// Creates a subscription client and subscribes the initial channels and
/// patterns of `options`.
///
/// Every message received is passed to `on_message`.
pub async fn create_subscription_client<F>(
    context: &HeimdallContext,
    transport: Arc<dyn Transport>,
    options: SubscriptionOptions,
    on_message: F,
) -> Result<HeimdallSubscription, Error>
where
    F: Fn(SubscriptionMessage) + Send + Sync + 'static,
{
    HeimdallSubscription::create(context, transport, options, Arc::new(on_message)).await
}
