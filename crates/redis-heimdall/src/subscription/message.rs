use std::sync::Arc;

/// A message delivered to a subscription client.
///
/// `pattern` is set when the message matched a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionMessage {
    pub channel: String,
    pub pattern: Option<String>,
    pub message: String,
}

impl SubscriptionMessage {
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            pattern: None,
            message: message.into(),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// Receives every message of a subscription client.
pub type MessageCallback = Arc<dyn Fn(SubscriptionMessage) + Send + Sync>;
