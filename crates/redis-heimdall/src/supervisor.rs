//! Reconnect supervision shared by every heimdall client.
//!
//! A [`Supervisor`] owns the current transport client. Guards report
//! connection loss to it; the first report starts a reconnect episode that
//! runs the [`ReconnectProcess`], installs the new transport client, closes
//! the previous one and finally runs the post-reconnect jobs. Further reports
//! are swallowed while the episode runs, and commands fail fast with
//! `ACCESS_DURING_RECONNECT`.

use std::sync::{Arc, Weak};

use futures::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use redis_heimdall_core::{
    Error, HeimdallError, Reason, Transport, TransportClient, TransportError,
};
use redis_heimdall_reconnect::{ConnectionState, ReconnectProcess, ReconnectState};
use tracing::{debug, error, info, trace, warn};

#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_gauge, gauge};
#[cfg(feature = "metrics")]
use std::sync::Once;

use crate::context::HeimdallContext;
use crate::guard::{fail, ConnectionKind, FailureHandler, GuardedConnection};
use crate::options::HeimdallOptions;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

/// Rounds of failing post-reconnect jobs between two warnings.
const JOB_FAILURE_LOG_EVERY: u32 = 10;

/// Work run after every successful reconnect, before the episode counts as
/// succeeded. A failing job restarts the episode.
pub trait PostReconnectJob: Send + Sync {
    fn execute(&self, supervisor: &Supervisor) -> BoxFuture<'static, Result<(), Error>>;
}

/// Runs at the start of every episode round, before the reconnect process.
pub type BeforeReconnect = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Current {
    client: Arc<dyn TransportClient>,
    generation: u64,
}

struct SupervisorInner {
    options: HeimdallOptions,
    context: HeimdallContext,
    endpoints: String,
    process: ReconnectProcess,
    current: Mutex<Current>,
    state: ReconnectState,
    kind: ConnectionKind,
    before_reconnect: Mutex<Option<BeforeReconnect>>,
    jobs: Mutex<Vec<Arc<dyn PostReconnectJob>>>,
}

/// Owns the transport of a client and drives its reconnect episodes.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// A supervisor handing out standard connections.
    pub fn new(
        context: &HeimdallContext,
        transport: Arc<dyn Transport>,
        options: HeimdallOptions,
    ) -> Self {
        Self::with_kind(context, transport, options, ConnectionKind::Standard)
    }

    pub(crate) fn with_kind(
        context: &HeimdallContext,
        transport: Arc<dyn Transport>,
        options: HeimdallOptions,
        kind: ConnectionKind,
    ) -> Self {
        #[cfg(feature = "metrics")]
        METRICS_INIT.call_once(|| {
            describe_counter!(
                "heimdall_reconnect_episodes_total",
                "Reconnect episodes started after a connection loss"
            );
            describe_counter!(
                "heimdall_reconnect_outcomes_total",
                "Reconnect episode rounds by outcome (succeeded, failed or job_failed)"
            );
            describe_counter!(
                "heimdall_calls_rejected_total",
                "Calls rejected without reaching the transport"
            );
            describe_gauge!(
                "heimdall_reconnecting",
                "Whether a reconnect episode is running (1) or not (0)"
            );
        });

        let endpoints: Arc<[String]> = options.endpoints().into();
        let client = transport.create_client(&endpoints);
        let process = ReconnectProcess::new(
            transport,
            Arc::clone(&endpoints),
            options.reconnect_config().clone(),
        );

        Self {
            inner: Arc::new(SupervisorInner {
                endpoints: options.endpoints_to_string(),
                options,
                context: context.clone(),
                process,
                current: Mutex::new(Current {
                    client,
                    generation: 0,
                }),
                state: ReconnectState::new(),
                kind,
                before_reconnect: Mutex::new(None),
                jobs: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Hands out a guarded connection of the current transport.
    ///
    /// Fails with `ACCESS_DURING_RECONNECT` while an episode runs, without
    /// touching the transport.
    pub fn connect(&self) -> BoxFuture<'static, Result<GuardedConnection, Error>> {
        if let Err(e) = self.inner.check_available() {
            return fail(e);
        }

        let (client, generation) = {
            let current = self.inner.current.lock();
            (Arc::clone(&current.client), current.generation)
        };
        let call = client.connect();
        let inner = Arc::clone(&self.inner);

        async move {
            match call.await {
                Ok(conn) => {
                    inner.state.mark_connected();
                    let on_failure = SupervisorInner::failure_handler(&inner, generation);
                    Ok(inner.kind.wrap(conn, on_failure))
                }
                Err(TransportError::PoolExhausted) => {
                    inner.reject("client_busy");
                    Err(HeimdallError::with_reason(
                        Reason::ClientBusy,
                        "Too many commands to Redis at once, please use rate limiting or increase the max pool size",
                    )
                    .with_cause(TransportError::PoolExhausted)
                    .into())
                }
                Err(TransportError::Heimdall(e)) => Err(e.into()),
                Err(e) => {
                    let error = HeimdallError::with_reason(
                        Reason::ConnectionIssue,
                        format!("Failed to connect to Redis server(s) {}", inner.endpoints),
                    )
                    .with_cause(e);
                    inner.report_failure(generation, error.clone());
                    Err(error.into())
                }
            }
        }
        .boxed()
    }

    /// Starts a reconnect episode unless one is running or the supervisor is
    /// closed.
    pub fn handle_connection_failure(&self, cause: HeimdallError) {
        SupervisorInner::handle_connection_failure(&self.inner, cause);
    }

    /// Replaces the hook run before every episode round.
    pub fn set_before_reconnect(&self, hook: BeforeReconnect) {
        *self.inner.before_reconnect.lock() = Some(hook);
    }

    pub fn add_post_reconnect_job(&self, job: Arc<dyn PostReconnectJob>) {
        self.inner.jobs.lock().push(job);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.state()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.state.is_reconnecting()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.is_closed()
    }

    /// Episode and attempt counters.
    pub fn reconnect_state(&self) -> &ReconnectState {
        &self.inner.state
    }

    pub fn options(&self) -> &HeimdallOptions {
        &self.inner.options
    }

    pub fn context(&self) -> &HeimdallContext {
        &self.inner.context
    }

    /// Fails with `ACCESS_DURING_RECONNECT` while an episode runs and with
    /// `CONNECTION_ISSUE` once closed.
    pub(crate) fn check_available(&self) -> Result<(), HeimdallError> {
        self.inner.check_available()
    }

    /// Closes the current transport and stops any running episode. Only the
    /// first call has an effect.
    ///
    /// A running episode winds down on its own: its pending attempt client
    /// and any transport it swapped out are closed too.
    pub fn close(&self) -> BoxFuture<'static, ()> {
        if !self.inner.state.close() {
            return futures::future::ready(()).boxed();
        }
        debug!(client = %self.inner.options.name(), "closing client");

        #[cfg(feature = "metrics")]
        gauge!("heimdall_reconnecting", "client" => self.inner.options.name().to_string()).set(0.0);

        let client = Arc::clone(&self.inner.current.lock().client);
        client.close()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("name", &self.inner.options.name())
            .field("endpoints", &self.inner.endpoints)
            .field("state", &self.inner.state.state())
            .field("generation", &self.inner.current.lock().generation)
            .finish()
    }
}

impl SupervisorInner {
    fn check_available(&self) -> Result<(), HeimdallError> {
        match self.state.state() {
            ConnectionState::Closed => {
                self.reject("closed");
                Err(HeimdallError::with_reason(
                    Reason::ConnectionIssue,
                    "client already closed",
                ))
            }
            ConnectionState::Reconnecting => {
                self.reject("access_during_reconnect");
                Err(HeimdallError::with_reason(
                    Reason::AccessDuringReconnect,
                    "Client is in reconnection process",
                ))
            }
            _ => Ok(()),
        }
    }

    fn reject(&self, _reason: &'static str) {
        #[cfg(feature = "metrics")]
        counter!(
            "heimdall_calls_rejected_total",
            "client" => self.options.name().to_string(),
            "reason" => _reason
        )
        .increment(1);
    }

    /// Failure handler for guards of transport `generation`.
    fn failure_handler(this: &Arc<Self>, generation: u64) -> FailureHandler {
        let weak: Weak<Self> = Arc::downgrade(this);
        Arc::new(move |cause| {
            if let Some(inner) = weak.upgrade() {
                inner.report_failure(generation, cause);
            }
        })
    }

    fn report_failure(self: Arc<Self>, generation: u64, cause: HeimdallError) {
        let current = self.current.lock().generation;
        if current != generation {
            trace!(
                client = %self.options.name(),
                generation,
                current,
                "ignoring failure of retired transport"
            );
            return;
        }
        Self::handle_connection_failure(&self, cause);
    }

    fn handle_connection_failure(this: &Arc<Self>, cause: HeimdallError) {
        let name = this.options.name();
        if this.state.is_closed() {
            debug!(client = %name, "closed client will not reconnect");
            return;
        }
        if !this.state.try_begin_episode() {
            trace!(
                client = %name,
                endpoints = %this.endpoints,
                "reconnect already in progress"
            );
            return;
        }

        warn!(
            client = %name,
            endpoints = %this.endpoints,
            "connection(s) to Redis server(s) lost, reconnecting"
        );
        debug!(client = %name, cause = %cause.diagnostic(), "connection loss cause");

        #[cfg(feature = "metrics")]
        {
            counter!("heimdall_reconnect_episodes_total", "client" => name.to_string())
                .increment(1);
            gauge!("heimdall_reconnecting", "client" => name.to_string()).set(1.0);
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(client = %name, error = %e, "no async runtime to reconnect on");
                this.state.abandon_episode();
                return;
            }
        };
        runtime.spawn(Self::run_episode(Arc::clone(this), cause));
    }

    async fn run_episode(self: Arc<Self>, cause: HeimdallError) {
        let name = self.options.name().to_string();
        let mut round: u32 = 0;

        loop {
            let hook = self.before_reconnect.lock().clone();
            if let Some(hook) = hook {
                if self.until_closed(hook()).await.is_none() {
                    return;
                }
            }
            self.notify(&self.options.topics().start, Some(cause.diagnostic()));

            let client = match self.process.start(&self.state).await {
                Ok(client) => client,
                Err(_) if self.state.is_closed() => return,
                Err(e) => {
                    self.state.abandon_episode();
                    warn!(
                        client = %name,
                        endpoints = %self.endpoints,
                        error = %e,
                        "reconnect failed"
                    );
                    self.notify(&self.options.topics().failed, Some(e.diagnostic()));
                    self.finish("failed");
                    return;
                }
            };

            let retired = {
                let mut current = self.current.lock();
                if self.state.is_closed() {
                    None
                } else {
                    current.generation += 1;
                    Some(std::mem::replace(&mut current.client, Arc::clone(&client)))
                }
            };
            let Some(retired) = retired else {
                client.close().await;
                return;
            };
            self.state.record_reconnect();
            retired.close().await;

            if !self.state.finish_episode() {
                return;
            }
            info!(
                client = %name,
                endpoints = %self.endpoints,
                attempts = self.state.attempts(),
                "reconnected to Redis server(s)"
            );

            let supervisor = Supervisor {
                inner: Arc::clone(&self),
            };
            let jobs: Vec<_> = self.jobs.lock().clone();
            let Some(results) = self
                .until_closed(join_all(jobs.iter().map(|job| job.execute(&supervisor))))
                .await
            else {
                return;
            };

            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed == 0 {
                self.notify(&self.options.topics().succeeded, None);
                self.finish("succeeded");
                return;
            }

            round += 1;
            #[cfg(feature = "metrics")]
            counter!(
                "heimdall_reconnect_outcomes_total",
                "client" => name.clone(),
                "outcome" => "job_failed"
            )
            .increment(1);
            if round == 1 || round % JOB_FAILURE_LOG_EVERY == 0 {
                warn!(client = %name, failed, round, "post reconnect job failed, reconnecting again");
            } else {
                debug!(client = %name, failed, round, "post reconnect job failed, reconnecting again");
            }

            if self.state.is_closed() || !self.state.try_begin_episode() {
                return;
            }
            let pause = self.options.reconnect_config().policy().delay_for_attempt(0);
            if self.until_closed(tokio::time::sleep(pause)).await.is_none() {
                return;
            }
        }
    }

    /// Runs `work` unless the supervisor is closed first.
    async fn until_closed<F: std::future::Future>(&self, work: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.state.closed() => None,
            output = work => Some(output),
        }
    }

    fn finish(&self, _outcome: &'static str) {
        #[cfg(feature = "metrics")]
        {
            let name = self.options.name().to_string();
            counter!(
                "heimdall_reconnect_outcomes_total",
                "client" => name.clone(),
                "outcome" => _outcome
            )
            .increment(1);
            gauge!("heimdall_reconnecting", "client" => name).set(0.0);
        }
    }

    fn notify(&self, topic: &str, payload: Option<String>) {
        if self.state.is_closed() || !self.options.notifications_enabled() {
            return;
        }
        self.context.notifications().publish(topic, payload);
    }
}
