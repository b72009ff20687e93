//! The reconnect process: produce a fresh, verified transport client or give up.

use std::sync::Arc;
use std::time::Instant;

use redis_heimdall_core::{
    Command, HeimdallError, Reason, Request, Transport, TransportClient, TransportError,
};
use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};
#[cfg(feature = "metrics")]
use std::sync::Once;

use crate::config::ReconnectConfig;
use crate::events::ReconnectEvent;
use crate::state::ReconnectState;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Reply a healthy server gives to `PING`.
pub const PONG: &str = "PONG";

/// Why a single reconnect attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    #[error("liveness probe failed: {0}")]
    Ping(#[source] TransportError),

    #[error("unexpected liveness probe reply \"{0}\"")]
    UnexpectedReply(String),
}

/// Connects through `client`, sends `PING` and expects `PONG`.
///
/// The probing connection is closed whatever the outcome.
pub async fn probe(client: &dyn TransportClient) -> Result<(), ProbeError> {
    let conn = client.connect().await.map_err(ProbeError::Connect)?;
    let reply = conn.send(Request::cmd(Command::PING)).await;
    conn.close().await;

    match reply {
        Ok(reply) if reply.as_string().as_deref() == Some(PONG) => Ok(()),
        Ok(reply) => Err(ProbeError::UnexpectedReply(reply.to_string())),
        Err(e) => Err(ProbeError::Ping(e)),
    }
}

/// Selected from the `enabled` flag of the [`ReconnectConfig`].
pub enum ReconnectProcess {
    /// Fails immediately with `RECONNECT_DISABLED`.
    Disabled { endpoints: Arc<[String]> },

    /// Retries with the configured pause until a probe succeeds or the
    /// attempt budget is used up.
    Interval(IntervalProcess),
}

pub struct IntervalProcess {
    transport: Arc<dyn Transport>,
    endpoints: Arc<[String]>,
    config: Arc<ReconnectConfig>,
}

impl ReconnectProcess {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: impl Into<Arc<[String]>>,
        config: ReconnectConfig,
    ) -> Self {
        let endpoints = endpoints.into();
        if !config.enabled {
            return ReconnectProcess::Disabled { endpoints };
        }

        #[cfg(feature = "metrics")]
        METRICS_INIT.call_once(|| {
            describe_counter!(
                "heimdall_reconnect_attempts_total",
                "Reconnect attempts by result (success or failure)"
            );
            describe_counter!(
                "heimdall_reconnect_give_ups_total",
                "Reconnect processes that stopped trying"
            );
        });

        ReconnectProcess::Interval(IntervalProcess {
            transport,
            endpoints,
            config: Arc::new(config),
        })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, ReconnectProcess::Interval(_))
    }

    /// Runs one reconnect episode.
    ///
    /// Failed attempts are counted in `state`; the count is reset first.
    /// Closing `state` stops the episode with `CONNECTION_ISSUE`; a pending
    /// attempt client is closed before returning.
    pub async fn start(
        &self,
        state: &ReconnectState,
    ) -> Result<Arc<dyn TransportClient>, HeimdallError> {
        match self {
            ReconnectProcess::Disabled { endpoints } => Err(HeimdallError::with_reason(
                Reason::ReconnectDisabled,
                format!(
                    "Reconnect to Redis server(s) {} is not configured for retries",
                    endpoints.join(",")
                ),
            )),
            ReconnectProcess::Interval(process) => process.run(state).await,
        }
    }
}

impl IntervalProcess {
    async fn run(&self, state: &ReconnectState) -> Result<Arc<dyn TransportClient>, HeimdallError> {
        let name = self.config.name.as_str();
        let mut last_error: Option<ProbeError> = None;
        state.reset_attempts();

        loop {
            if state.is_closed() {
                return Err(self.cancelled());
            }
            let previous = state.attempts();
            if let Some(max) = self.config.max_attempts {
                if previous >= max {
                    return Err(self.give_up(max, previous, last_error));
                }
            }

            let Some(outcome) = self.attempt(state).await else {
                return Err(self.cancelled());
            };
            match outcome {
                Ok(client) => {
                    #[cfg(feature = "metrics")]
                    counter!("heimdall_reconnect_attempts_total", "client" => name.to_string(), "result" => "success")
                        .increment(1);

                    self.config.event_listeners.emit(&ReconnectEvent::Restored {
                        name: name.to_string(),
                        timestamp: Instant::now(),
                        attempts: previous + 1,
                    });
                    return Ok(client);
                }
                Err(error) => {
                    let attempt = state.record_attempt();
                    let delay = self
                        .config
                        .policy
                        .delay_for_attempt(attempt.saturating_sub(1) as usize);
                    debug!(
                        client = name,
                        attempt,
                        ?delay,
                        error = %error,
                        "reconnect attempt failed"
                    );

                    #[cfg(feature = "metrics")]
                    counter!("heimdall_reconnect_attempts_total", "client" => name.to_string(), "result" => "failure")
                        .increment(1);

                    self.config.event_listeners.emit(&ReconnectEvent::AttemptFailed {
                        name: name.to_string(),
                        timestamp: Instant::now(),
                        attempt,
                        delay,
                        error: error.to_string(),
                    });
                    last_error = Some(error);
                    tokio::select! {
                        biased;
                        _ = state.closed() => return Err(self.cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// `None` when the state was closed while the attempt ran. The attempt
    /// client is closed unless it is handed out.
    async fn attempt(
        &self,
        state: &ReconnectState,
    ) -> Option<Result<Arc<dyn TransportClient>, ProbeError>> {
        let client = self.transport.create_client(&self.endpoints);
        let outcome = tokio::select! {
            biased;
            _ = state.closed() => None,
            outcome = probe(client.as_ref()) => Some(outcome),
        };
        match outcome {
            Some(Ok(())) => Some(Ok(client)),
            Some(Err(e)) => {
                client.close().await;
                Some(Err(e))
            }
            None => {
                client.close().await;
                None
            }
        }
    }

    fn cancelled(&self) -> HeimdallError {
        debug!(client = self.config.name.as_str(), "reconnect stopped, client closed");
        HeimdallError::with_reason(Reason::ConnectionIssue, "client already closed")
    }

    fn give_up(&self, max: u32, attempts: u32, last_error: Option<ProbeError>) -> HeimdallError {
        let endpoints = self.endpoints.join(",");
        warn!(
            client = self.config.name.as_str(),
            endpoints = %endpoints,
            max,
            "max number of reconnect attempts reached"
        );

        #[cfg(feature = "metrics")]
        counter!("heimdall_reconnect_give_ups_total", "client" => self.config.name.clone(), "reason" => Reason::MaxAttemptsReached.as_str())
            .increment(1);

        self.config.event_listeners.emit(&ReconnectEvent::GaveUp {
            name: self.config.name.clone(),
            timestamp: Instant::now(),
            reason: Reason::MaxAttemptsReached,
            attempts,
        });

        let error = HeimdallError::with_reason(
            Reason::MaxAttemptsReached,
            format!(
                "Max number of reconnect attempts \"{max}\" to Redis server(s) {endpoints} reached"
            ),
        );
        match last_error {
            Some(cause) => error.with_cause(cause),
            None => error,
        }
    }
}
