use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{self, try_join_all, BoxFuture, FutureExt};
use redis_heimdall_core::{Command, Error, HeimdallError, Reason, Request, Response, Transport};
use redis_heimdall_reconnect::ConnectionState;
use tracing::{info, warn};

use super::{ClientInstanceId, MessageCallback, SubscriptionRegistry, SubscriptionStore};
use crate::client::Client;
use crate::context::HeimdallContext;
use crate::guard::{fail, ConnectionKind, GuardedConnection};
use crate::options::SubscriptionOptions;
use crate::pinned::PinnedConnection;
use crate::supervisor::{PostReconnectJob, Supervisor};

struct SubscriptionInner {
    id: ClientInstanceId,
    supervisor: Supervisor,
    pinned: PinnedConnection,
    registry: SubscriptionRegistry,
    store: SubscriptionStore,
    initial_channels: Vec<String>,
    initial_patterns: Vec<String>,
    closed: AtomicBool,
}

/// Pub/sub client.
///
/// Holds one connection in subscription mode. The channels and patterns the
/// server acknowledged are recorded and subscribed again after every
/// reconnect.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use redis_heimdall::{
///     create_subscription_client, HeimdallContext, HeimdallOptions, SubscriptionOptions,
/// };
/// use redis_heimdall_core::memory::MemoryServer;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let server = MemoryServer::new();
/// let context = HeimdallContext::new();
/// let options = SubscriptionOptions::new(HeimdallOptions::default()).channel_name("news");
///
/// let client = create_subscription_client(&context, Arc::new(server.clone()), options, |msg| {
///     println!("{}: {}", msg.channel, msg.message);
/// })
/// .await
/// .unwrap();
///
/// client.add_channel_patterns(["alerts.*"]).await.unwrap();
/// assert_eq!(client.registry().channels(), vec!["news"]);
/// assert_eq!(client.registry().patterns(), vec!["alerts.*"]);
/// # }
/// ```
#[derive(Clone)]
pub struct HeimdallSubscription {
    inner: Arc<SubscriptionInner>,
}

impl HeimdallSubscription {
    /// Creates the client and subscribes the initial channels and patterns.
    ///
    /// Fails with `UNABLE_TO_START` if the initial subscriptions fail; the
    /// client is closed then.
    pub async fn create(
        context: &HeimdallContext,
        transport: Arc<dyn Transport>,
        options: SubscriptionOptions,
        on_message: MessageCallback,
    ) -> Result<Self, Error> {
        let id = ClientInstanceId::new();
        let store = context.subscription_store().clone();
        let registry = store.create(id);
        let kind = ConnectionKind::Subscription {
            registry: registry.clone(),
            on_message,
        };
        let supervisor = Supervisor::with_kind(context, transport, options.base().clone(), kind);
        let pinned = PinnedConnection::default();

        let hook_pinned = pinned.clone();
        supervisor.set_before_reconnect(Arc::new(move || {
            let pinned = hook_pinned.clone();
            async move { pinned.release().await }.boxed()
        }));

        let inner = Arc::new(SubscriptionInner {
            id,
            supervisor,
            pinned,
            registry,
            store,
            initial_channels: options.initial_channels().to_vec(),
            initial_patterns: options.initial_patterns().to_vec(),
            closed: AtomicBool::new(false),
        });
        inner
            .supervisor
            .add_post_reconnect_job(Arc::new(ResubscribeJob {
                inner: Arc::downgrade(&inner),
            }));

        let client = Self { inner };
        if let Err(e) = client.start().await {
            client.close().await;
            return Err(e);
        }
        Ok(client)
    }

    pub fn id(&self) -> ClientInstanceId {
        self.inner.id
    }

    /// Channels and patterns acknowledged by the server.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    async fn start(&self) -> Result<(), Error> {
        let inner = &self.inner;
        if inner.initial_channels.is_empty() && inner.initial_patterns.is_empty() {
            return Ok(());
        }

        let conn = SubscriptionInner::connection(inner).await.map_err(|e| {
            HeimdallError::with_reason(
                Reason::UnableToStart,
                "Unable to subscribe initial channels",
            )
            .with_cause(e)
        })?;
        if conn.as_subscription().is_none() {
            return Err(HeimdallError::with_reason(
                Reason::UnableToStart,
                "Connection is not in subscription mode",
            )
            .into());
        }

        SubscriptionInner::subscribe_all(
            inner,
            &conn,
            inner.initial_channels.clone(),
            inner.initial_patterns.clone(),
        )
        .await
        .map_err(|e| {
            HeimdallError::with_reason(
                Reason::UnableToStart,
                "Unable to subscribe initial channels",
            )
            .with_cause(e)
        })?;

        info!(
            client = %inner.supervisor.options().name(),
            channels = ?inner.initial_channels,
            patterns = ?inner.initial_patterns,
            "subscribed to initial channels"
        );
        Ok(())
    }

    /// Subscribes `channels`. Succeeds without a command when empty.
    pub fn add_channels<I, S>(&self, channels: I) -> BoxFuture<'static, Result<(), Error>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.change(Command::SUBSCRIBE, channels)
    }

    pub fn remove_channels<I, S>(&self, channels: I) -> BoxFuture<'static, Result<(), Error>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.change(Command::UNSUBSCRIBE, channels)
    }

    pub fn add_channel_patterns<I, S>(&self, patterns: I) -> BoxFuture<'static, Result<(), Error>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.change(Command::PSUBSCRIBE, patterns)
    }

    pub fn remove_channel_patterns<I, S>(&self, patterns: I) -> BoxFuture<'static, Result<(), Error>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.change(Command::PUNSUBSCRIBE, patterns)
    }

    fn change<I, S>(&self, command: Command, targets: I) -> BoxFuture<'static, Result<(), Error>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets: Vec<String> = targets.into_iter().map(Into::into).collect();
        if targets.is_empty() {
            return future::ready(Ok(())).boxed();
        }
        self.send(Request::cmd(command).args(targets))
            .map(|result| result.map(|_| ()))
            .boxed()
    }
}

impl std::fmt::Debug for HeimdallSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeimdallSubscription")
            .field("id", &self.inner.id)
            .field("supervisor", &self.inner.supervisor)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl SubscriptionInner {
    /// The pinned connection, pinning a new one if needed.
    fn connection(this: &Arc<Self>) -> BoxFuture<'static, Result<GuardedConnection, Error>> {
        if let Err(e) = this.supervisor.check_available() {
            return fail(e);
        }
        if let Some(conn) = this.pinned.get() {
            return future::ready(Ok(conn)).boxed();
        }
        let connect = this.supervisor.connect();
        let inner = Arc::clone(this);
        async move {
            let (pinned, extra) = inner.pinned.get_or_set(connect.await?);
            if let Some(extra) = extra {
                extra.close().await;
            }
            Ok(pinned)
        }
        .boxed()
    }

    /// Sends on `conn`, unpinning it on `CONNECTION_ISSUE`.
    fn run<T: Send + 'static>(
        this: &Arc<Self>,
        conn: GuardedConnection,
        call: BoxFuture<'static, Result<T, Error>>,
    ) -> BoxFuture<'static, Result<T, Error>> {
        let inner = Arc::clone(this);
        async move {
            let result = call.await;
            if matches!(&result, Err(e) if e.is_reason(Reason::ConnectionIssue)) {
                inner.pinned.release_if(&conn).await;
            }
            result
        }
        .boxed()
    }

    /// `SUBSCRIBE` and `PSUBSCRIBE` issued together; both must succeed.
    fn subscribe_all(
        this: &Arc<Self>,
        conn: &GuardedConnection,
        channels: Vec<String>,
        patterns: Vec<String>,
    ) -> BoxFuture<'static, Result<Vec<Response>, Error>> {
        let mut calls = Vec::with_capacity(2);
        if !channels.is_empty() {
            let call = conn.send(Request::cmd(Command::SUBSCRIBE).args(channels));
            calls.push(Self::run(this, conn.clone(), call));
        }
        if !patterns.is_empty() {
            let call = conn.send(Request::cmd(Command::PSUBSCRIBE).args(patterns));
            calls.push(Self::run(this, conn.clone(), call));
        }
        try_join_all(calls).boxed()
    }
}

/// Subscribes everything recorded in the registry again on the fresh
/// connection.
struct ResubscribeJob {
    inner: Weak<SubscriptionInner>,
}

impl PostReconnectJob for ResubscribeJob {
    fn execute(&self, _supervisor: &Supervisor) -> BoxFuture<'static, Result<(), Error>> {
        let Some(inner) = self.inner.upgrade() else {
            return future::ready(Ok(())).boxed();
        };
        let (channels, patterns) = inner.registry.snapshot();
        if channels.is_empty() && patterns.is_empty() {
            return future::ready(Ok(())).boxed();
        }

        let connection = SubscriptionInner::connection(&inner);
        async move {
            let conn = connection.await?;
            if conn.as_subscription().is_none() {
                warn!(
                    client = %inner.supervisor.options().name(),
                    "connection is not in subscription mode, skipping resubscribe"
                );
                return Ok(());
            }
            let (channel_count, pattern_count) = (channels.len(), patterns.len());
            SubscriptionInner::subscribe_all(&inner, &conn, channels, patterns).await?;
            info!(
                client = %inner.supervisor.options().name(),
                channels = channel_count,
                patterns = pattern_count,
                "resubscribed after reconnect"
            );
            Ok(())
        }
        .boxed()
    }
}

impl Client for HeimdallSubscription {
    fn connect(&self) -> BoxFuture<'static, Result<GuardedConnection, Error>> {
        SubscriptionInner::connection(&self.inner)
    }

    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, Error>> {
        if !request.command().is_pub_sub() {
            return fail(HeimdallError::with_reason(
                Reason::UnsupportedAction,
                format!(
                    "Command {} not supported in subscription mode",
                    request.command()
                ),
            ));
        }
        let connection = SubscriptionInner::connection(&self.inner);
        let inner = Arc::clone(&self.inner);
        async move {
            let conn = connection.await?;
            let call = conn.send(request);
            SubscriptionInner::run(&inner, conn, call).await
        }
        .boxed()
    }

    fn batch(&self, requests: Vec<Request>) -> BoxFuture<'static, Result<Vec<Response>, Error>> {
        let connection = SubscriptionInner::connection(&self.inner);
        let inner = Arc::clone(&self.inner);
        async move {
            let conn = connection.await?;
            let call = conn.batch(requests);
            SubscriptionInner::run(&inner, conn, call).await
        }
        .boxed()
    }

    /// Releases the connection, closes the supervisor and drops the registry.
    fn close(&self) -> BoxFuture<'static, ()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return future::ready(()).boxed();
        }
        let inner = Arc::clone(&self.inner);
        async move {
            inner.pinned.release().await;
            inner.supervisor.close().await;
            inner.store.destroy(&inner.id);
        }
        .boxed()
    }
}
