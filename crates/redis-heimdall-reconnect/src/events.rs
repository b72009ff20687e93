//! Events emitted while reconnecting.

use std::time::{Duration, Instant};

use redis_heimdall_core::{HeimdallEvent, Reason};

#[derive(Debug, Clone)]
pub enum ReconnectEvent {
    /// One attempt failed; the next one follows after `delay`.
    AttemptFailed {
        name: String,
        timestamp: Instant,
        attempt: u32,
        delay: Duration,
        error: String,
    },

    /// A verified transport is available again.
    Restored {
        name: String,
        timestamp: Instant,
        attempts: u32,
    },

    /// The process stopped trying.
    GaveUp {
        name: String,
        timestamp: Instant,
        reason: Reason,
        attempts: u32,
    },
}

impl HeimdallEvent for ReconnectEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReconnectEvent::AttemptFailed { .. } => "attempt_failed",
            ReconnectEvent::Restored { .. } => "restored",
            ReconnectEvent::GaveUp { .. } => "gave_up",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            ReconnectEvent::AttemptFailed { timestamp, .. }
            | ReconnectEvent::Restored { timestamp, .. }
            | ReconnectEvent::GaveUp { timestamp, .. } => *timestamp,
        }
    }

    fn client_name(&self) -> &str {
        match self {
            ReconnectEvent::AttemptFailed { name, .. }
            | ReconnectEvent::Restored { name, .. }
            | ReconnectEvent::GaveUp { name, .. } => name,
        }
    }
}
