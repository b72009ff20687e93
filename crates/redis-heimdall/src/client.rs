//! The client surface and the pooled client.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use redis_heimdall_core::{Error, HeimdallError, Reason, Request, Response, Transport};
use redis_heimdall_reconnect::ConnectionState;
use tower::Service;

use crate::context::HeimdallContext;
use crate::guard::{fail, GuardedConnection};
use crate::options::HeimdallOptions;
use crate::supervisor::Supervisor;

/// Operations shared by every heimdall client.
///
/// Every future is `'static`: it owns what it needs and may outlive the call.
pub trait Client: Send + Sync {
    /// A guarded connection. Closing it is up to the caller.
    fn connect(&self) -> BoxFuture<'static, Result<GuardedConnection, Error>>;

    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, Error>>;

    fn batch(&self, requests: Vec<Request>) -> BoxFuture<'static, Result<Vec<Response>, Error>>;

    /// Closes the client. Idempotent.
    fn close(&self) -> BoxFuture<'static, ()>;
}

/// Pooled client: every command borrows a connection from the transport and
/// hands it back once the reply arrived.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use redis_heimdall::{create_client, Client, HeimdallContext, HeimdallOptions};
/// use redis_heimdall_core::memory::MemoryServer;
/// use redis_heimdall_core::{Command, Request};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let context = HeimdallContext::new();
/// let client = create_client(&context, Arc::new(MemoryServer::new()), HeimdallOptions::default());
///
/// client.send(Request::cmd(Command::SET).args(["greeting", "hello"])).await.unwrap();
/// let reply = client.send(Request::cmd(Command::GET).arg("greeting")).await.unwrap();
/// assert_eq!(reply.as_string().as_deref(), Some("hello"));
///
/// client.close().await;
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Heimdall {
    supervisor: Supervisor,
}

impl Heimdall {
    pub fn new(
        context: &HeimdallContext,
        transport: Arc<dyn Transport>,
        options: HeimdallOptions,
    ) -> Self {
        Self {
            supervisor: Supervisor::new(context, transport, options),
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }
}

impl Client for Heimdall {
    fn connect(&self) -> BoxFuture<'static, Result<GuardedConnection, Error>> {
        self.supervisor.connect()
    }

    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, Error>> {
        if request.command().is_pub_sub() {
            return fail(HeimdallError::with_reason(
                Reason::UnsupportedAction,
                "Please use the heimdall subscription client for PubSub",
            ));
        }
        let connect = self.supervisor.connect();
        async move {
            let conn = connect.await?;
            let result = conn.send(request).await;
            conn.close().await;
            result
        }
        .boxed()
    }

    fn batch(&self, requests: Vec<Request>) -> BoxFuture<'static, Result<Vec<Response>, Error>> {
        if requests.iter().any(|r| r.command().is_pub_sub()) {
            return fail(HeimdallError::with_reason(
                Reason::UnsupportedAction,
                "PubSub command in connection-less batch not allowed",
            ));
        }
        let connect = self.supervisor.connect();
        async move {
            let conn = connect.await?;
            let result = conn.batch(requests).await;
            conn.close().await;
            result
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        self.supervisor.close()
    }
}

impl Service<Request> for Heimdall {
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
