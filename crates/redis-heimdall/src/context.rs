//! Process-wide state shared by heimdall clients.

use tokio::sync::broadcast;
use tracing::debug;

use crate::subscription::SubscriptionStore;

const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

/// A reconnect notification.
///
/// `payload` carries a diagnostic text on the start and failed topics and is
/// empty on the succeeded topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub payload: Option<String>,
}

/// Fire-and-forget notification bus.
///
/// Publishing never blocks and never fails; without subscribers, or when a
/// subscriber lags behind, notifications are lost.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, topic: &str, payload: Option<String>) {
        let delivered = self
            .sender
            .send(Notification {
                topic: topic.to_string(),
                payload,
            })
            .unwrap_or(0);
        debug!(topic, delivered, "published reconnect notification");
    }
}

/// Shared by every client created from it: the notification bus and the
/// subscription registries.
#[derive(Debug, Clone)]
pub struct HeimdallContext {
    notifications: NotificationBus,
    subscriptions: SubscriptionStore,
}

impl HeimdallContext {
    pub fn new() -> Self {
        Self::with_notification_capacity(DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Notifications buffered per subscriber before the slowest one lags.
    pub fn with_notification_capacity(capacity: usize) -> Self {
        Self {
            notifications: NotificationBus::new(capacity),
            subscriptions: SubscriptionStore::default(),
        }
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.notifications
    }

    /// Shorthand for `notifications().subscribe()`.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    pub fn subscription_store(&self) -> &SubscriptionStore {
        &self.subscriptions
    }
}

impl Default for HeimdallContext {
    fn default() -> Self {
        Self::new()
    }
}
