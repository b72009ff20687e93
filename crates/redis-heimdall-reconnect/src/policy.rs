//! Pause strategy between reconnect attempts.

use std::sync::Arc;
use std::time::Duration;

use crate::backoff::{
    ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, IntervalFunction,
};

/// Default pause between attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(2000);

/// How long to wait after a failed reconnect attempt.
pub enum ReconnectPolicy {
    /// Same pause after every attempt.
    Fixed(FixedInterval),

    /// Pause doubling after each attempt up to a cap.
    Exponential(ExponentialBackoff),

    /// Exponential pause with jitter.
    ExponentialRandom(ExponentialRandomBackoff),

    /// User supplied function.
    Custom(Arc<dyn IntervalFunction>),
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        ReconnectPolicy::Fixed(FixedInterval::new(delay))
    }

    /// Starts at `initial_delay`, doubles, never exceeds `max_delay`.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        ReconnectPolicy::Exponential(ExponentialBackoff::new(initial_delay).max_interval(max_delay))
    }

    /// Like [`exponential`](Self::exponential), randomised by
    /// `randomization_factor` (`0.0..=1.0`).
    pub fn exponential_random(
        initial_delay: Duration,
        max_delay: Duration,
        randomization_factor: f64,
    ) -> Self {
        ReconnectPolicy::ExponentialRandom(
            ExponentialRandomBackoff::new(initial_delay, randomization_factor)
                .max_interval(max_delay),
        )
    }

    pub fn custom<F>(interval: F) -> Self
    where
        F: IntervalFunction + 'static,
    {
        ReconnectPolicy::Custom(Arc::new(interval))
    }

    /// Pause after the failed attempt number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            ReconnectPolicy::Fixed(f) => f.next_interval(attempt),
            ReconnectPolicy::Exponential(e) => e.next_interval(attempt),
            ReconnectPolicy::ExponentialRandom(e) => e.next_interval(attempt),
            ReconnectPolicy::Custom(c) => c.next_interval(attempt),
        }
    }
}

impl Clone for ReconnectPolicy {
    fn clone(&self) -> Self {
        match self {
            Self::Fixed(f) => Self::Fixed(f.clone()),
            Self::Exponential(e) => Self::Exponential(e.clone()),
            Self::ExponentialRandom(e) => Self::ExponentialRandom(e.clone()),
            Self::Custom(c) => Self::Custom(Arc::clone(c)),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}

impl std::fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(fixed) => f.debug_tuple("Fixed").field(fixed).finish(),
            Self::Exponential(e) => f.debug_tuple("Exponential").field(e).finish(),
            Self::ExponentialRandom(e) => f.debug_tuple("ExponentialRandom").field(e).finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}
