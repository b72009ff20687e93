//! Client options.

use std::time::Duration;

use redis_heimdall_core::EventListener;
use redis_heimdall_reconnect::{
    ReconnectConfig, ReconnectConfigBuilder, ReconnectEvent, ReconnectPolicy,
};

pub const DEFAULT_ENDPOINT: &str = "redis://localhost:6379";
pub const DEFAULT_START_TOPIC: &str = "/redis/heimdall/reconnecting/start";
pub const DEFAULT_SUCCEEDED_TOPIC: &str = "/redis/heimdall/reconnecting/succeeded";
pub const DEFAULT_FAILED_TOPIC: &str = "/redis/heimdall/reconnecting/failed";

/// Topics of the reconnect notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTopics {
    pub start: String,
    pub succeeded: String,
    pub failed: String,
}

impl Default for NotificationTopics {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_TOPIC.to_string(),
            succeeded: DEFAULT_SUCCEEDED_TOPIC.to_string(),
            failed: DEFAULT_FAILED_TOPIC.to_string(),
        }
    }
}

/// Options of a heimdall client. Immutable once the client is built.
#[derive(Debug, Clone)]
pub struct HeimdallOptions {
    endpoints: Vec<String>,
    reconnect: ReconnectConfig,
    notifications: bool,
    topics: NotificationTopics,
}

impl HeimdallOptions {
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use redis_heimdall::HeimdallOptions;
    ///
    /// let options = HeimdallOptions::builder()
    ///     .name("sessions")
    ///     .endpoint("redis://cache-1:6379")
    ///     .reconnect_interval(Duration::from_millis(500))
    ///     .max_reconnect_attempts(10)
    ///     .build();
    ///
    /// assert_eq!(options.endpoints_to_string(), "redis://cache-1:6379");
    /// assert_eq!(options.max_reconnect_attempts(), 10);
    /// ```
    pub fn builder() -> HeimdallOptionsBuilder {
        HeimdallOptionsBuilder::default()
    }

    pub fn name(&self) -> &str {
        self.reconnect.name()
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Endpoints joined with `,`, as used in messages.
    pub fn endpoints_to_string(&self) -> String {
        self.endpoints.join(",")
    }

    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    pub fn is_reconnect_enabled(&self) -> bool {
        self.reconnect.is_enabled()
    }

    /// `-1` when unlimited.
    pub fn max_reconnect_attempts(&self) -> i64 {
        self.reconnect.max_attempts().map_or(-1, i64::from)
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications
    }

    pub fn topics(&self) -> &NotificationTopics {
        &self.topics
    }
}

impl Default for HeimdallOptions {
    fn default() -> Self {
        HeimdallOptionsBuilder::default().build()
    }
}

/// Builder for [`HeimdallOptions`].
#[derive(Debug)]
pub struct HeimdallOptionsBuilder {
    endpoints: Vec<String>,
    reconnect: ReconnectConfigBuilder,
    notifications: bool,
    topics: NotificationTopics,
}

impl Default for HeimdallOptionsBuilder {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            reconnect: ReconnectConfig::builder(),
            notifications: true,
            topics: NotificationTopics::default(),
        }
    }
}

impl HeimdallOptionsBuilder {
    /// Client name used in logs, events and metric labels. Default `"heimdall"`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.reconnect = self.reconnect.name(name);
        self
    }

    /// Adds an endpoint. Without any, `redis://localhost:6379` is used.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Replaces all endpoints.
    pub fn endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Reconnect after connection loss. Default `true`.
    pub fn reconnect(mut self, enabled: bool) -> Self {
        self.reconnect = self.reconnect.enabled(enabled);
        self
    }

    /// Pause between reconnect attempts. Default 2 seconds.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect = self.reconnect.interval(interval);
        self
    }

    /// Replaces the fixed interval with another pause strategy.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = self.reconnect.policy(policy);
        self
    }

    /// Attempts per reconnect episode; values below 1 mean unlimited.
    /// Default `-1`.
    pub fn max_reconnect_attempts(mut self, attempts: i64) -> Self {
        self.reconnect = if attempts >= 1 {
            self.reconnect
                .max_attempts(u32::try_from(attempts).unwrap_or(u32::MAX))
        } else {
            self.reconnect.unlimited_attempts()
        };
        self
    }

    pub fn on_reconnect_event<L>(mut self, listener: L) -> Self
    where
        L: EventListener<ReconnectEvent> + 'static,
    {
        self.reconnect = self.reconnect.on_event(listener);
        self
    }

    /// Publish reconnect notifications on the context bus. Default `true`.
    pub fn reconnecting_notifications(mut self, enabled: bool) -> Self {
        self.notifications = enabled;
        self
    }

    pub fn reconnecting_start_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.start = topic.into();
        self
    }

    pub fn reconnecting_succeeded_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.succeeded = topic.into();
        self
    }

    pub fn reconnecting_failed_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.failed = topic.into();
        self
    }

    pub fn build(self) -> HeimdallOptions {
        let endpoints = if self.endpoints.is_empty() {
            vec![DEFAULT_ENDPOINT.to_string()]
        } else {
            self.endpoints
        };
        HeimdallOptions {
            endpoints,
            reconnect: self.reconnect.build(),
            notifications: self.notifications,
            topics: self.topics,
        }
    }
}

/// Options of a subscription client: base options plus the channels and
/// patterns subscribed at start.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    base: HeimdallOptions,
    channel_names: Vec<String>,
    channel_patterns: Vec<String>,
}

impl SubscriptionOptions {
    pub fn new(base: HeimdallOptions) -> Self {
        Self {
            base,
            channel_names: Vec::new(),
            channel_patterns: Vec::new(),
        }
    }

    pub fn channel_name(mut self, name: impl Into<String>) -> Self {
        self.channel_names.push(name.into());
        self
    }

    pub fn channel_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn channel_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.channel_patterns.push(pattern.into());
        self
    }

    pub fn channel_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn base(&self) -> &HeimdallOptions {
        &self.base
    }

    pub fn initial_channels(&self) -> &[String] {
        &self.channel_names
    }

    pub fn initial_patterns(&self) -> &[String] {
        &self.channel_patterns
    }
}
