//! Lifecycle state of one supervised client.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Where a supervised client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection verified yet, or the last reconnect episode gave up.
    Disconnected,

    /// A connection was obtained since the last episode.
    Connected,

    /// A reconnect episode is running; access is rejected.
    Reconnecting,

    /// Closed for good.
    Closed,
}

impl ConnectionState {
    fn encode(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Reconnecting => 2,
            ConnectionState::Closed => 3,
        }
    }

    fn decode(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Reconnecting,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared state of a supervised client. Clones observe the same state.
///
/// Every transition is a single compare-and-swap, so at most one caller can
/// start a reconnect episode.
#[derive(Clone)]
pub struct ReconnectState {
    state: Arc<AtomicU8>,
    attempts: Arc<AtomicU32>,
    episodes: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    closed: Arc<watch::Sender<bool>>,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected.encode())),
            attempts: Arc::new(AtomicU32::new(0)),
            episodes: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(watch::Sender::new(false)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::decode(self.state.load(Ordering::Acquire))
    }

    pub fn is_reconnecting(&self) -> bool {
        self.state() == ConnectionState::Reconnecting
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    fn transition(&self, from: &[ConnectionState], to: ConnectionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                from.contains(&ConnectionState::decode(raw))
                    .then_some(to.encode())
            })
            .is_ok()
    }

    /// `Disconnected -> Connected` after a connection was obtained.
    pub fn mark_connected(&self) -> bool {
        self.transition(&[ConnectionState::Disconnected], ConnectionState::Connected)
    }

    /// Enters `Reconnecting`. Returns `false` when an episode is already
    /// running or the client is closed.
    pub fn try_begin_episode(&self) -> bool {
        let begun = self.transition(
            &[ConnectionState::Disconnected, ConnectionState::Connected],
            ConnectionState::Reconnecting,
        );
        if begun {
            self.episodes.fetch_add(1, Ordering::AcqRel);
            self.reset_attempts();
        }
        begun
    }

    /// `Reconnecting -> Connected` once a new transport is installed.
    pub fn finish_episode(&self) -> bool {
        self.transition(&[ConnectionState::Reconnecting], ConnectionState::Connected)
    }

    /// `Reconnecting -> Disconnected` when the episode gave up.
    pub fn abandon_episode(&self) -> bool {
        self.transition(
            &[ConnectionState::Reconnecting],
            ConnectionState::Disconnected,
        )
    }

    /// Moves to `Closed` and wakes every [`closed`](Self::closed) waiter.
    /// Returns `true` only for the first call.
    pub fn close(&self) -> bool {
        let first = self
            .state
            .swap(ConnectionState::Closed.encode(), Ordering::AcqRel)
            != ConnectionState::Closed.encode();
        if first {
            self.closed.send_replace(true);
        }
        first
    }

    /// Resolves once [`close`](Self::close) was called, immediately if it
    /// already was.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // the sender lives as long as `self`
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Failed attempts of the current episode.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Counts one failed attempt and returns the new total.
    pub fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn reset_attempts(&self) {
        self.attempts.store(0, Ordering::Release);
    }

    /// Episodes started since creation.
    pub fn episodes(&self) -> u64 {
        self.episodes.load(Ordering::Acquire)
    }

    /// Transports swapped in since creation.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Acquire)
    }

    pub fn record_reconnect(&self) -> u64 {
        self.reconnects.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReconnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectState")
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .field("episodes", &self.episodes())
            .field("reconnects", &self.reconnects())
            .finish()
    }
}
