//! Pub/sub support: the subscription client, its connection guard and the
//! subscription registries.

mod client;
mod connection;
mod message;
mod registry;

pub use client::HeimdallSubscription;
pub use connection::SubscriptionConnection;
pub use message::{MessageCallback, SubscriptionMessage};
pub use registry::{ClientInstanceId, SubscriptionRegistry, SubscriptionStore};
