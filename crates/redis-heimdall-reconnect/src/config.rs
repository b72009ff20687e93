use std::time::Duration;

use redis_heimdall_core::events::{EventListener, EventListeners, FnListener};
use redis_heimdall_core::Reason;

use crate::events::ReconnectEvent;
use crate::policy::ReconnectPolicy;

/// Configuration of the reconnect process.
#[derive(Clone)]
pub struct ReconnectConfig {
    pub(crate) name: String,
    pub(crate) enabled: bool,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) max_attempts: Option<u32>,
    pub(crate) event_listeners: EventListeners<ReconnectEvent>,
}

impl std::fmt::Debug for ReconnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfig")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("policy", &self.policy)
            .field("max_attempts", &self.max_attempts)
            .field("event_listeners", &self.event_listeners.len())
            .finish()
    }
}

impl ReconnectConfig {
    pub fn builder() -> ReconnectConfigBuilder {
        ReconnectConfigBuilder::default()
    }

    /// Name of the client, used in logs, events and metric labels.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// `None` means unlimited.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfigBuilder::default().build()
    }
}

/// Builder for [`ReconnectConfig`].
pub struct ReconnectConfigBuilder {
    name: String,
    enabled: bool,
    policy: ReconnectPolicy,
    max_attempts: Option<u32>,
    event_listeners: EventListeners<ReconnectEvent>,
}

impl Default for ReconnectConfigBuilder {
    fn default() -> Self {
        Self {
            name: "heimdall".to_string(),
            enabled: true,
            policy: ReconnectPolicy::default(),
            max_attempts: None,
            event_listeners: EventListeners::new(),
        }
    }
}

impl std::fmt::Debug for ReconnectConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectConfigBuilder")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("policy", &self.policy)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl ReconnectConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Switches reconnecting on or off. Default is on.
    ///
    /// When off, a lost connection fails with `RECONNECT_DISABLED`.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Fixed pause between attempts. Default is 2 seconds.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use redis_heimdall_reconnect::ReconnectConfig;
    ///
    /// let config = ReconnectConfig::builder()
    ///     .interval(Duration::from_millis(500))
    ///     .build();
    /// assert_eq!(config.policy().delay_for_attempt(3), Duration::from_millis(500));
    /// ```
    pub fn interval(mut self, interval: Duration) -> Self {
        self.policy = ReconnectPolicy::fixed(interval);
        self
    }

    /// Replaces the pause strategy.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use redis_heimdall_reconnect::{ReconnectConfig, ReconnectPolicy};
    ///
    /// let config = ReconnectConfig::builder()
    ///     .policy(ReconnectPolicy::exponential(
    ///         Duration::from_millis(100),
    ///         Duration::from_secs(10),
    ///     ))
    ///     .build();
    /// ```
    pub fn policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Gives up after `max_attempts` failed attempts per episode. `0` means
    /// unlimited.
    ///
    /// ```
    /// use redis_heimdall_reconnect::ReconnectConfig;
    ///
    /// assert_eq!(ReconnectConfig::builder().max_attempts(3).build().max_attempts(), Some(3));
    /// assert_eq!(ReconnectConfig::builder().max_attempts(0).build().max_attempts(), None);
    /// ```
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = (max_attempts > 0).then_some(max_attempts);
        self
    }

    pub fn unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Registers a listener for every [`ReconnectEvent`].
    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: EventListener<ReconnectEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    /// Called after a failed attempt with the attempt number and the pause
    /// before the next one.
    ///
    /// ```
    /// use redis_heimdall_reconnect::ReconnectConfig;
    ///
    /// let config = ReconnectConfig::builder()
    ///     .on_attempt_failed(|attempt, delay| {
    ///         println!("attempt {attempt} failed, next in {delay:?}");
    ///     })
    ///     .build();
    /// ```
    pub fn on_attempt_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ReconnectEvent::AttemptFailed { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        }));
        self
    }

    /// Called with the number of the successful attempt.
    pub fn on_restored<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ReconnectEvent::Restored { attempts, .. } = event {
                f(*attempts);
            }
        }));
        self
    }

    /// Called when the process gives up.
    pub fn on_give_up<F>(mut self, f: F) -> Self
    where
        F: Fn(Reason) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let ReconnectEvent::GaveUp { reason, .. } = event {
                f(*reason);
            }
        }));
        self
    }

    pub fn build(self) -> ReconnectConfig {
        ReconnectConfig {
            name: self.name,
            enabled: self.enabled,
            policy: self.policy,
            max_attempts: self.max_attempts,
            event_listeners: self.event_listeners,
        }
    }
}
