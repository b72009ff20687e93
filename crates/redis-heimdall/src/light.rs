//! Single connection client.
//!
//! [`HeimdallLight`] pins one guarded connection and sends every command over
//! it. Commands issued before the first connection exists wait in a queue and
//! go out in issue order once it does. A command failing with
//! `CONNECTION_ISSUE` unpins the connection; the next command pins a new one.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use redis_heimdall_core::{Error, HeimdallError, Reason, Request, Response, Transport};
use redis_heimdall_reconnect::ConnectionState;
use tokio::sync::oneshot;
use tower::Service;
use tracing::{debug, warn};

use crate::client::Client;
use crate::context::HeimdallContext;
use crate::guard::{fail, GuardedConnection};
use crate::options::HeimdallOptions;
use crate::pinned::PinnedConnection;
use crate::supervisor::{PostReconnectJob, Supervisor};

type Deferred = Box<dyn FnOnce(Result<GuardedConnection, Error>) + Send>;

#[derive(Default)]
struct Startup {
    started: bool,
    connecting: bool,
    queue: VecDeque<Deferred>,
}

struct LightInner {
    supervisor: Supervisor,
    pinned: PinnedConnection,
    startup: Mutex<Startup>,
}

/// Client holding a single connection.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use redis_heimdall::{create_light_client, Client, HeimdallContext, HeimdallOptions};
/// use redis_heimdall_core::memory::MemoryServer;
/// use redis_heimdall_core::{Command, Request};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let context = HeimdallContext::new();
/// let client = create_light_client(&context, Arc::new(MemoryServer::new()), HeimdallOptions::default());
///
/// // queued until the connection is up, then sent in order
/// let first = client.send(Request::cmd(Command::RPUSH).args(["jobs", "a"]));
/// let second = client.send(Request::cmd(Command::RPUSH).args(["jobs", "b"]));
/// assert_eq!(first.await.unwrap().as_integer(), Some(1));
/// assert_eq!(second.await.unwrap().as_integer(), Some(2));
/// # }
/// ```
#[derive(Clone)]
pub struct HeimdallLight {
    inner: Arc<LightInner>,
}

impl HeimdallLight {
    /// Creates the client and, inside a Tokio runtime, starts connecting.
    pub fn new(
        context: &HeimdallContext,
        transport: Arc<dyn Transport>,
        options: HeimdallOptions,
    ) -> Self {
        let supervisor = Supervisor::new(context, transport, options);
        let pinned = PinnedConnection::default();

        let hook_pinned = pinned.clone();
        supervisor.set_before_reconnect(Arc::new(move || {
            let pinned = hook_pinned.clone();
            async move { pinned.release().await }.boxed()
        }));

        let inner = Arc::new(LightInner {
            supervisor,
            pinned,
            startup: Mutex::new(Startup::default()),
        });
        inner.supervisor.add_post_reconnect_job(Arc::new(LightJob {
            inner: Arc::downgrade(&inner),
        }));

        if tokio::runtime::Handle::try_current().is_ok() && inner.begin_start() {
            LightInner::start(&inner);
        }
        Self { inner }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    /// `true` once the queued startup commands went out.
    pub fn is_started(&self) -> bool {
        self.inner.startup.lock().started
    }

    /// Commands waiting for the first connection.
    pub fn queued(&self) -> usize {
        self.inner.startup.lock().queue.len()
    }

    fn dispatch<T, F>(&self, op: F) -> BoxFuture<'static, Result<T, Error>>
    where
        T: Send + 'static,
        F: FnOnce(GuardedConnection) -> BoxFuture<'static, Result<T, Error>> + Send + 'static,
    {
        let inner = &self.inner;
        if inner.supervisor.is_closed() {
            return fail(HeimdallError::with_reason(
                Reason::ConnectionIssue,
                "client already closed",
            ));
        }

        {
            let mut startup = inner.startup.lock();
            if !startup.started {
                let (tx, rx) = oneshot::channel();
                let weak = Arc::downgrade(inner);
                startup.queue.push_back(Box::new(move |conn| {
                    let outcome = match (conn, weak.upgrade()) {
                        (Ok(conn), Some(inner)) => LightInner::run_on(&inner, conn, op),
                        (Ok(_), None) => fail(closed_before_start()),
                        (Err(e), _) => future::ready(Err(e)).boxed(),
                    };
                    let _ = tx.send(outcome);
                }));
                let kick = !startup.connecting && !inner.supervisor.is_reconnecting();
                if kick {
                    startup.connecting = true;
                }
                drop(startup);
                if kick {
                    LightInner::start(inner);
                }

                return async move {
                    match rx.await {
                        Ok(outcome) => outcome.await,
                        Err(_) => Err(closed_before_start().into()),
                    }
                }
                .boxed();
            }
        }

        if let Err(e) = inner.supervisor.check_available() {
            return fail(e);
        }
        if let Some(conn) = inner.pinned.get() {
            return LightInner::run_on(inner, conn, op);
        }
        let connect = inner.supervisor.connect();
        let inner = Arc::clone(inner);
        async move {
            let conn = inner.pin(connect.await?).await;
            LightInner::run_on(&inner, conn, op).await
        }
        .boxed()
    }
}

impl std::fmt::Debug for HeimdallLight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let startup = self.inner.startup.lock();
        f.debug_struct("HeimdallLight")
            .field("supervisor", &self.inner.supervisor)
            .field("pinned", &self.inner.pinned)
            .field("started", &startup.started)
            .field("queued", &startup.queue.len())
            .finish()
    }
}

impl LightInner {
    /// Marks the startup connect as running; `false` if it already is.
    fn begin_start(&self) -> bool {
        let mut startup = self.startup.lock();
        if startup.started || startup.connecting {
            return false;
        }
        startup.connecting = true;
        true
    }

    fn start(this: &Arc<Self>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(
                    client = %this.supervisor.options().name(),
                    "no async runtime to connect on, queued commands wait for the next call"
                );
                this.startup.lock().connecting = false;
                return;
            }
        };

        let connect = this.supervisor.connect();
        let weak = Arc::downgrade(this);
        runtime.spawn(async move {
            let result = connect.await;
            let Some(inner) = weak.upgrade() else {
                if let Ok(conn) = result {
                    conn.close().await;
                }
                return;
            };
            match result {
                Ok(conn) => {
                    let conn = inner.pin(conn).await;
                    inner.drain(&conn);
                }
                Err(e) => inner.start_failed(e),
            }
        });
    }

    /// Pins `conn`, or closes it if another connection got pinned first.
    async fn pin(&self, conn: GuardedConnection) -> GuardedConnection {
        let (pinned, extra) = self.pinned.get_or_set(conn);
        if let Some(extra) = extra {
            extra.close().await;
        }
        pinned
    }

    /// Runs the queued commands on `conn`, in issue order, once.
    ///
    /// The startup lock is held throughout so later commands cannot overtake
    /// queued ones.
    fn drain(&self, conn: &GuardedConnection) {
        let mut startup = self.startup.lock();
        startup.connecting = false;
        if startup.started {
            return;
        }
        let queued = startup.queue.len();
        while let Some(deferred) = startup.queue.pop_front() {
            deferred(Ok(conn.clone()));
        }
        startup.started = true;
        debug!(
            client = %self.supervisor.options().name(),
            queued,
            "light client started"
        );
    }

    fn start_failed(&self, error: Error) {
        let failed = {
            let mut startup = self.startup.lock();
            startup.connecting = false;
            if self.supervisor.options().is_reconnect_enabled() && self.supervisor.is_reconnecting()
            {
                debug!(
                    client = %self.supervisor.options().name(),
                    queued = startup.queue.len(),
                    "start postponed until reconnected"
                );
                return;
            }
            std::mem::take(&mut startup.queue)
        };
        for deferred in failed {
            deferred(Err(error.clone()));
        }
    }

    fn run_on<T, F>(this: &Arc<Self>, conn: GuardedConnection, op: F) -> BoxFuture<'static, Result<T, Error>>
    where
        T: Send + 'static,
        F: FnOnce(GuardedConnection) -> BoxFuture<'static, Result<T, Error>>,
    {
        let call = op(conn.clone());
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
}

fn closed_before_start() -> HeimdallError {
    HeimdallError::with_reason(Reason::Internal, "client closed before start")
}

/// Pins a fresh connection after each reconnect and runs a startup that did
/// not happen yet.
struct LightJob {
    inner: Weak<LightInner>,
}

impl PostReconnectJob for LightJob {
    fn execute(&self, supervisor: &Supervisor) -> BoxFuture<'static, Result<(), Error>> {
        let Some(inner) = self.inner.upgrade() else {
            return future::ready(Ok(())).boxed();
        };
        let connect = supervisor.connect();
        async move {
            let conn = inner.pin(connect.await?).await;
            inner.drain(&conn);
            Ok(())
        }
        .boxed()
    }
}

impl Client for HeimdallLight {
    fn connect(&self) -> BoxFuture<'static, Result<GuardedConnection, Error>> {
        self.dispatch(|conn| future::ready(Ok(conn)).boxed())
    }

    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, Error>> {
        if request.command().is_pub_sub() {
            return fail(HeimdallError::with_reason(
                Reason::UnsupportedAction,
                "Please use the heimdall subscription client for PubSub",
            ));
        }
        self.dispatch(move |conn| conn.send(request))
    }

    fn batch(&self, requests: Vec<Request>) -> BoxFuture<'static, Result<Vec<Response>, Error>> {
        if requests.iter().any(|r| r.command().is_pub_sub()) {
            return fail(HeimdallError::with_reason(
                Reason::UnsupportedAction,
                "PubSub command in batch not allowed",
            ));
        }
        self.dispatch(move |conn| conn.batch(requests))
    }

    /// Fails queued commands, releases the connection, then closes the
    /// supervisor.
    fn close(&self) -> BoxFuture<'static, ()> {
        let queued = std::mem::take(&mut self.inner.startup.lock().queue);
        drop(queued);
        let inner = Arc::clone(&self.inner);
        async move {
            inner.pinned.release().await;
            inner.supervisor.close().await;
        }
        .boxed()
    }
}

impl Service<Request> for HeimdallLight {
    type Response = Response;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Response, Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        Client::send(self, request)
    }
}
