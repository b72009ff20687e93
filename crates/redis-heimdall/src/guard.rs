//! Guards wrapping live transport connections.
//!
//! A guard forwards commands to its connection and classifies every failure
//! into the heimdall taxonomy. Connection loss, whether seen in a command
//! result or signalled asynchronously by the transport, is reported to the
//! owning supervisor's failure handler.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use hashbrown::HashMap;
use parking_lot::Mutex;
use redis_heimdall_core::{
    Error, HeimdallError, MessageHandler, Reason, Request, Response, TransportConnection,
    TransportError,
};
use tokio::sync::oneshot;
use tracing::trace;

use crate::subscription::{MessageCallback, SubscriptionConnection, SubscriptionRegistry};

/// Receives connection loss reports of a guard.
pub(crate) type FailureHandler = Arc<dyn Fn(HeimdallError) + Send + Sync>;

/// Result of one command invocation, resolved at most once.
pub(crate) struct ResultSlot<T> {
    sender: Mutex<Option<oneshot::Sender<Result<T, Error>>>>,
}

impl<T> ResultSlot<T> {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<Result<T, Error>>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(Self {
            sender: Mutex::new(Some(sender)),
        });
        (slot, receiver)
    }

    /// Delivers `result` unless the slot was already resolved or claimed.
    pub(crate) fn resolve(&self, result: Result<T, Error>) -> bool {
        match self.sender.lock().take() {
            Some(sender) => {
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Marks the slot resolved without delivering anything; `false` if it
    /// already was.
    pub(crate) fn claim(&self) -> bool {
        self.sender.lock().take().is_some()
    }
}

/// A command waiting for its result, failed when the connection is lost.
trait Pending: Send + Sync {
    fn fail(&self, error: &HeimdallError);
}

impl<T: Send> Pending for ResultSlot<T> {
    fn fail(&self, error: &HeimdallError) {
        self.resolve(Err(error.clone().into()));
    }
}

struct GuardInner {
    delegate: Arc<dyn TransportConnection>,
    on_failure: FailureHandler,
    pending: Mutex<HashMap<u64, Arc<dyn Pending>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

struct Registration<'a> {
    inner: &'a GuardInner,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
    }
}

/// Guard of a standard (non subscription) connection.
#[derive(Clone)]
pub struct HeimdallConnection {
    inner: Arc<GuardInner>,
}

impl HeimdallConnection {
    /// Wraps `delegate` and registers its exception and end handlers.
    pub(crate) fn new(delegate: Arc<dyn TransportConnection>, on_failure: FailureHandler) -> Self {
        let inner = Arc::new(GuardInner {
            delegate,
            on_failure,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        inner.init();
        Self { inner }
    }

    pub fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, Error>> {
        let call = self.inner.delegate.send(request);
        GuardInner::guard(&self.inner, call)
    }

    pub fn batch(&self, requests: Vec<Request>) -> BoxFuture<'static, Result<Vec<Response>, Error>> {
        let call = self.inner.delegate.batch(requests);
        GuardInner::guard(&self.inner, call)
    }

    /// Closes the connection. Signals the transport raises afterwards are
    /// ignored.
    pub fn close(&self) -> BoxFuture<'static, ()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.delegate.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// `true` if both guards wrap the same connection.
    pub fn ptr_eq(&self, other: &HeimdallConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn delegate(&self) -> &Arc<dyn TransportConnection> {
        &self.inner.delegate
    }

    #[cfg(test)]
    pub(crate) fn pending_commands(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl std::fmt::Debug for HeimdallConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeimdallConnection")
            .field("closed", &self.is_closed())
            .field("pending", &self.inner.pending.lock().len())
            .finish()
    }
}

impl GuardInner {
    fn init(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.delegate.exception_handler(Box::new(move |error| {
            if let Some(inner) = weak.upgrade() {
                inner.connection_signal(
                    HeimdallError::with_reason(
                        Reason::ConnectionIssue,
                        "Connection issue caught by exception handler",
                    )
                    .with_cause(error),
                );
            }
        }));

        let weak = Arc::downgrade(self);
        self.delegate.end_handler(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.connection_signal(HeimdallError::with_reason(
                    Reason::ConnectionIssue,
                    "Connection did end",
                ));
            }
        }));
    }

    /// An asynchronous loss signal: report it and fail every outstanding
    /// command with it.
    fn connection_signal(&self, error: HeimdallError) {
        if self.closed.load(Ordering::SeqCst) {
            trace!(error = %error, "signal from closed connection ignored");
            return;
        }
        (self.on_failure)(error.clone());

        let pending: Vec<_> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for command in pending {
            command.fail(&error);
        }
    }

    fn guard<T>(
        this: &Arc<Self>,
        call: BoxFuture<'static, Result<T, TransportError>>,
    ) -> BoxFuture<'static, Result<T, Error>>
    where
        T: Send + 'static,
    {
        let (slot, mut resolved) = ResultSlot::new();
        let id = this.next_id.fetch_add(1, Ordering::Relaxed);
        this.pending
            .lock()
            .insert(id, Arc::clone(&slot) as Arc<dyn Pending>);
        let inner = Arc::clone(this);

        async move {
            let _registration = Registration { inner: &inner, id };
            tokio::select! {
                biased;
                signalled = &mut resolved => signalled.unwrap_or_else(|_| Err(dropped())),
                outcome = call => {
                    let result = outcome.map_err(|e| inner.classify(e));
                    if slot.claim() {
                        result
                    } else {
                        resolved.await.unwrap_or_else(|_| Err(dropped()))
                    }
                }
            }
        }
        .boxed()
    }

    /// Maps a transport failure onto the taxonomy, reporting connection loss.
    fn classify(&self, error: TransportError) -> Error {
        match error {
            TransportError::Heimdall(e) => e.into(),
            TransportError::Redis(e) if e.is_connection_closed() => self.connection_lost(
                HeimdallError::with_reason(Reason::ConnectionIssue, "Connection closed by server")
                    .with_cause(e),
            ),
            TransportError::Io(e) if is_disconnect(e.kind()) => self.connection_lost(
                HeimdallError::with_reason(Reason::ConnectionIssue, "Connection lost")
                    .with_shared_cause(e),
            ),
            TransportError::Redis(e) => Error::Redis(e),
            TransportError::PoolExhausted => HeimdallError::with_reason(
                Reason::ClientBusy,
                "Too many commands to Redis at once, please use rate limiting or increase the pool size",
            )
            .into(),
            other => HeimdallError::new(Reason::Unspecified)
                .with_cause(other)
                .into(),
        }
    }

    fn connection_lost(&self, error: HeimdallError) -> Error {
        if !self.closed.load(Ordering::SeqCst) {
            (self.on_failure)(error.clone());
        }
        error.into()
    }
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

fn dropped() -> Error {
    HeimdallError::with_reason(Reason::Internal, "command result dropped").into()
}

/// Builds the guard matching the client kind.
#[derive(Clone)]
pub(crate) enum ConnectionKind {
    Standard,
    Subscription {
        registry: SubscriptionRegistry,
        on_message: MessageCallback,
    },
}

impl ConnectionKind {
    pub(crate) fn wrap(
        &self,
        delegate: Arc<dyn TransportConnection>,
        on_failure: FailureHandler,
    ) -> GuardedConnection {
        match self {
            ConnectionKind::Standard => {
                GuardedConnection::Standard(HeimdallConnection::new(delegate, on_failure))
            }
            ConnectionKind::Subscription {
                registry,
                on_message,
            } => GuardedConnection::Subscription(SubscriptionConnection::new(
                delegate,
                on_failure,
                registry.clone(),
                Arc::clone(on_message),
            )),
        }
    }
}

/// A guarded connection handed out by a heimdall client.
#[derive(Clone, Debug)]
pub enum GuardedConnection {
    Standard(HeimdallConnection),
    Subscription(SubscriptionConnection),
}

impl GuardedConnection {
    pub fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, Error>> {
        match self {
            GuardedConnection::Standard(c) => c.send(request),
            GuardedConnection::Subscription(c) => c.send(request),
        }
    }

    pub fn batch(&self, requests: Vec<Request>) -> BoxFuture<'static, Result<Vec<Response>, Error>> {
        match self {
            GuardedConnection::Standard(c) => c.batch(requests),
            GuardedConnection::Subscription(c) => c.batch(requests),
        }
    }

    pub fn close(&self) -> BoxFuture<'static, ()> {
        self.guard().close()
    }

    /// Registers a handler for pushed messages.
    ///
    /// Subscription connections route pushed messages themselves and refuse
    /// with `UNSUPPORTED_ACTION`.
    pub fn message_handler(&self, handler: MessageHandler) -> Result<(), Error> {
        match self {
            GuardedConnection::Standard(c) => {
                c.delegate().message_handler(handler);
                Ok(())
            }
            GuardedConnection::Subscription(c) => c.message_handler(handler),
        }
    }

    pub fn as_subscription(&self) -> Option<&SubscriptionConnection> {
        match self {
            GuardedConnection::Subscription(c) => Some(c),
            GuardedConnection::Standard(_) => None,
        }
    }

    pub fn ptr_eq(&self, other: &GuardedConnection) -> bool {
        self.guard().ptr_eq(other.guard())
    }

    fn guard(&self) -> &HeimdallConnection {
        match self {
            GuardedConnection::Standard(c) => c,
            GuardedConnection::Subscription(c) => c.guard(),
        }
    }
}

/// Completes immediately with `error`.
pub(crate) fn fail<T: Send + 'static>(error: HeimdallError) -> BoxFuture<'static, Result<T, Error>> {
    future::ready(Err(error.into())).boxed()
}
