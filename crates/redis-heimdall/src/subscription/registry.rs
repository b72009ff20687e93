use std::fmt;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Identifies one subscription client within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientInstanceId(Uuid);

impl ClientInstanceId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Default)]
struct Subscriptions {
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

/// Channels and patterns a subscription client is subscribed to.
///
/// Only the subscription connection changes it, from the acknowledgements the
/// server pushes. It survives reconnects and is replayed after each one.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<Subscriptions>>,
}

impl SubscriptionRegistry {
    pub(crate) fn add_channel(&self, channel: &str) {
        if self.inner.lock().channels.insert(channel.to_string()) {
            debug!(channel, "channel subscribed");
        }
    }

    pub(crate) fn remove_channel(&self, channel: &str) {
        if self.inner.lock().channels.remove(channel) {
            debug!(channel, "channel unsubscribed");
        }
    }

    pub(crate) fn add_pattern(&self, pattern: &str) {
        if self.inner.lock().patterns.insert(pattern.to_string()) {
            debug!(pattern, "pattern subscribed");
        }
    }

    pub(crate) fn remove_pattern(&self, pattern: &str) {
        if self.inner.lock().patterns.remove(pattern) {
            debug!(pattern, "pattern unsubscribed");
        }
    }

    /// Subscribed channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        sorted(&self.inner.lock().channels)
    }

    /// Subscribed patterns, sorted.
    pub fn patterns(&self) -> Vec<String> {
        sorted(&self.inner.lock().patterns)
    }

    /// Channels and patterns read under one lock.
    pub fn snapshot(&self) -> (Vec<String>, Vec<String>) {
        let subs = self.inner.lock();
        (sorted(&subs.channels), sorted(&subs.patterns))
    }

    pub fn is_empty(&self) -> bool {
        let subs = self.inner.lock();
        subs.channels.is_empty() && subs.patterns.is_empty()
    }
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut items: Vec<String> = set.iter().cloned().collect();
    items.sort();
    items
}

/// Registries of every subscription client in the process, keyed by
/// [`ClientInstanceId`].
#[derive(Debug, Clone, Default)]
pub struct SubscriptionStore {
    registries: Arc<Mutex<HashMap<ClientInstanceId, SubscriptionRegistry>>>,
}

impl SubscriptionStore {
    /// Returns the registry of `id`, creating it on first use.
    pub fn create(&self, id: ClientInstanceId) -> SubscriptionRegistry {
        self.registries.lock().entry(id).or_default().clone()
    }

    pub fn lookup(&self, id: &ClientInstanceId) -> Option<SubscriptionRegistry> {
        self.registries.lock().get(id).cloned()
    }

    /// Drops the registry of `id`. Returns `false` if there was none.
    pub fn destroy(&self, id: &ClientInstanceId) -> bool {
        self.registries.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.registries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.lock().is_empty()
    }
}
