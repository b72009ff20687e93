//! In-memory Redis stand-in implementing the transport contract.
//!
//! [`MemoryServer`] understands a handful of commands (strings, lists, pub/sub)
//! and exposes switches to make it unreachable, exhaust the pool, fail
//! commands, hold replies and break live connections. It records every
//! command it receives so tests can check what went over the "wire".
//!
//! ```
//! use redis_heimdall_core::memory::MemoryServer;
//! use redis_heimdall_core::{Command, Request, Transport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let server = MemoryServer::new();
//! let client = server.create_client(&["redis://memory".to_string()]);
//! let conn = client.connect().await.unwrap();
//! let pong = conn.send(Request::cmd(Command::PING)).await.unwrap();
//! assert_eq!(pong.as_string().as_deref(), Some("PONG"));
//! # }
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::transport::{
    EndHandler, ExceptionHandler, MessageHandler, RedisError, Request, Response, Transport,
    TransportClient, TransportConnection, TransportError,
};

type SharedException = Arc<dyn Fn(TransportError) + Send + Sync>;
type SharedEnd = Arc<dyn Fn() + Send + Sync>;
type SharedMessage = Arc<dyn Fn(Response) + Send + Sync>;
type CloseObserver = Arc<dyn Fn(u64) + Send + Sync>;

const OPEN: u8 = 0;
const BROKEN: u8 = 1;
const CLOSED: u8 = 2;

enum Value {
    Str(Vec<u8>),
    List(Vec<Vec<u8>>),
}

/// An in-memory Redis server. Cloning shares the server.
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<ServerState>,
}

struct ServerState {
    reachable: AtomicBool,
    pool_size: AtomicUsize,
    ping_reply: Mutex<String>,
    data: Mutex<HashMap<String, Value>>,
    connections: Mutex<Vec<Weak<ConnectionState>>>,
    failures: Mutex<VecDeque<TransportError>>,
    connect_failures: Mutex<VecDeque<TransportError>>,
    holding: AtomicBool,
    released: Notify,
    log: Mutex<Vec<String>>,
    endpoints: Mutex<Vec<String>>,
    next_client: AtomicU64,
    next_connection: AtomicU64,
    connect_attempts: AtomicUsize,
    closed_clients: Mutex<Vec<u64>>,
    close_observer: Mutex<Option<CloseObserver>>,
}

impl MemoryServer {
    /// A reachable server with an unlimited pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerState {
                reachable: AtomicBool::new(true),
                pool_size: AtomicUsize::new(0),
                ping_reply: Mutex::new("PONG".to_string()),
                data: Mutex::new(HashMap::new()),
                connections: Mutex::new(Vec::new()),
                failures: Mutex::new(VecDeque::new()),
                connect_failures: Mutex::new(VecDeque::new()),
                holding: AtomicBool::new(false),
                released: Notify::new(),
                log: Mutex::new(Vec::new()),
                endpoints: Mutex::new(Vec::new()),
                next_client: AtomicU64::new(0),
                next_connection: AtomicU64::new(0),
                connect_attempts: AtomicUsize::new(0),
                closed_clients: Mutex::new(Vec::new()),
                close_observer: Mutex::new(None),
            }),
        }
    }

    /// Makes the server (un)reachable. Going down also breaks every live
    /// connection.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.drop_connections();
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    /// Connections each client may hold at once, `0` for unlimited.
    pub fn set_pool_size(&self, size: usize) {
        self.inner.pool_size.store(size, Ordering::SeqCst);
    }

    /// Reply to a bare `PING`.
    pub fn set_ping_reply(&self, reply: impl Into<String>) {
        *self.inner.ping_reply.lock() = reply.into();
    }

    /// Fails the next command received on any connection with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.inner.failures.lock().push_back(error);
    }

    /// Fails the next connect with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.inner.connect_failures.lock().push_back(error);
    }

    /// Replies are computed but not delivered until [`release_responses`].
    ///
    /// [`release_responses`]: MemoryServer::release_responses
    pub fn hold_responses(&self) {
        self.inner.holding.store(true, Ordering::SeqCst);
    }

    pub fn release_responses(&self) {
        self.inner.holding.store(false, Ordering::SeqCst);
        self.inner.released.notify_waiters();
    }

    /// Breaks every live connection and fires its end handler.
    pub fn drop_connections(&self) {
        for conn in self.inner.open_connections() {
            if conn.mark(BROKEN) {
                let handler = conn.handlers.lock().end.clone();
                if let Some(handler) = handler {
                    handler();
                }
            }
        }
    }

    /// Fires the exception handler of every live connection.
    pub fn raise_exception(&self, error: TransportError) {
        for conn in self.inner.open_connections() {
            let handler = conn.handlers.lock().exception.clone();
            if let Some(handler) = handler {
                handler(error.clone());
            }
        }
    }

    /// Publishes `message` on `channel`, returns the number of deliveries.
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        self.inner.publish(channel.as_bytes(), message.as_bytes())
    }

    /// Called with the client id whenever a client is closed.
    pub fn on_client_close<F>(&self, f: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        *self.inner.close_observer.lock() = Some(Arc::new(f));
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn clients_created(&self) -> u64 {
        self.inner.next_client.load(Ordering::SeqCst)
    }

    /// Ids of closed clients, in closing order. Ids count from zero in
    /// creation order.
    pub fn closed_clients(&self) -> Vec<u64> {
        self.inner.closed_clients.lock().clone()
    }

    pub fn live_connections(&self) -> usize {
        self.inner.open_connections().len()
    }

    /// Endpoints passed to the most recent `create_client`.
    pub fn last_endpoints(&self) -> Vec<String> {
        self.inner.endpoints.lock().clone()
    }

    /// Every command received, rendered as `"CMD arg arg"`.
    pub fn command_log(&self) -> Vec<String> {
        self.inner.log.lock().clone()
    }

    pub fn clear_command_log(&self) {
        self.inner.log.lock().clear();
    }

    /// Number of received commands named `name`.
    pub fn count_commands(&self, name: &str) -> usize {
        let name = name.to_ascii_uppercase();
        self.inner
            .log
            .lock()
            .iter()
            .filter(|line| line.split(' ').next() == Some(name.as_str()))
            .count()
    }

    /// Channels subscribed by live connections, sorted.
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.collect_subscriptions(|subs| &subs.channels)
    }

    /// Patterns subscribed by live connections, sorted.
    pub fn subscribed_patterns(&self) -> Vec<String> {
        self.collect_subscriptions(|subs| &subs.patterns)
    }

    /// String value stored under `key`.
    pub fn value(&self, key: &str) -> Option<String> {
        match self.inner.data.lock().get(key) {
            Some(Value::Str(v)) => Some(String::from_utf8_lossy(v).into_owned()),
            _ => None,
        }
    }

    fn collect_subscriptions<F>(&self, pick: F) -> Vec<String>
    where
        F: Fn(&Subscriptions) -> &HashSet<String>,
    {
        let mut all = HashSet::new();
        for conn in self.inner.open_connections() {
            let subs = conn.subscriptions.lock();
            all.extend(pick(&*subs).iter().cloned());
        }
        let mut all: Vec<String> = all.into_iter().collect();
        all.sort();
        all
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryServer")
            .field("reachable", &self.is_reachable())
            .field("live_connections", &self.live_connections())
            .finish()
    }
}

impl Transport for MemoryServer {
    fn create_client(&self, endpoints: &[String]) -> Arc<dyn TransportClient> {
        *self.inner.endpoints.lock() = endpoints.to_vec();
        let id = self.inner.next_client.fetch_add(1, Ordering::SeqCst);
        Arc::new(MemoryClient {
            id,
            server: Arc::clone(&self.inner),
            pool: Arc::new(Pool::default()),
        })
    }
}

impl ServerState {
    fn open_connections(&self) -> Vec<Arc<ConnectionState>> {
        let mut conns = self.connections.lock();
        conns.retain(|weak| weak.strong_count() > 0);
        conns
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|conn| conn.status.load(Ordering::SeqCst) == OPEN)
            .collect()
    }

    async fn wait_released(&self) {
        loop {
            let released = self.released.notified();
            if !self.holding.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }

    fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        let channel_name = String::from_utf8_lossy(channel).into_owned();
        let mut deliveries = Vec::new();
        for conn in self.open_connections() {
            let subs = conn.subscriptions.lock();
            if subs.channels.contains(&channel_name) {
                deliveries.push((
                    Arc::clone(&conn),
                    Response::Array(vec![
                        Response::bulk("message"),
                        Response::bulk(channel),
                        Response::bulk(message),
                    ]),
                ));
            }
            for pattern in &subs.patterns {
                if glob_match(pattern.as_bytes(), channel) {
                    deliveries.push((
                        Arc::clone(&conn),
                        Response::Array(vec![
                            Response::bulk("pmessage"),
                            Response::bulk(pattern.as_str()),
                            Response::bulk(channel),
                            Response::bulk(message),
                        ]),
                    ));
                }
            }
        }
        let count = deliveries.len();
        for (conn, push) in deliveries {
            conn.push(push);
        }
        count
    }

    fn apply(&self, conn: &ConnectionState, request: &Request) -> Result<Response, TransportError> {
        let name = request.command().name();
        let args = request.arguments();
        let key = || String::from_utf8_lossy(&args[0]).into_owned();

        match name {
            "PING" => Ok(match args.first() {
                Some(payload) => Response::Bulk(payload.clone()),
                None => Response::Status(self.ping_reply.lock().clone()),
            }),
            "ECHO" => {
                arity(request, 1)?;
                Ok(Response::Bulk(args[0].clone()))
            }
            "SET" => {
                arity(request, 2)?;
                self.data.lock().insert(key(), Value::Str(args[1].clone()));
                Ok(Response::Status("OK".into()))
            }
            "GET" => {
                arity(request, 1)?;
                match self.data.lock().get(&key()) {
                    Some(Value::Str(v)) => Ok(Response::Bulk(v.clone())),
                    Some(Value::List(_)) => Err(wrong_type()),
                    None => Ok(Response::Nil),
                }
            }
            "DEL" => {
                arity(request, 1)?;
                let mut data = self.data.lock();
                let removed = args
                    .iter()
                    .filter(|k| data.remove(String::from_utf8_lossy(k).as_ref()).is_some())
                    .count();
                Ok(Response::Integer(removed as i64))
            }
            "INCR" => {
                arity(request, 1)?;
                let mut data = self.data.lock();
                let current = match data.get(&key()) {
                    Some(Value::Str(v)) => String::from_utf8_lossy(v)
                        .parse::<i64>()
                        .map_err(|_| not_integer())?,
                    Some(Value::List(_)) => return Err(wrong_type()),
                    None => 0,
                };
                let next = current.checked_add(1).ok_or_else(not_integer)?;
                data.insert(key(), Value::Str(next.to_string().into_bytes()));
                Ok(Response::Integer(next))
            }
            "RPUSH" => {
                arity(request, 2)?;
                let mut data = self.data.lock();
                let entry = data.entry(key()).or_insert_with(|| Value::List(Vec::new()));
                match entry {
                    Value::List(items) => {
                        items.extend(args[1..].iter().cloned());
                        Ok(Response::Integer(items.len() as i64))
                    }
                    Value::Str(_) => Err(wrong_type()),
                }
            }
            "LRANGE" => {
                arity(request, 3)?;
                let start = parse_index(&args[1])?;
                let stop = parse_index(&args[2])?;
                match self.data.lock().get(&key()) {
                    Some(Value::List(items)) => Ok(Response::Array(
                        range(items.len(), start, stop)
                            .map(|i| Response::Bulk(items[i].clone()))
                            .collect(),
                    )),
                    Some(Value::Str(_)) => Err(wrong_type()),
                    None => Ok(Response::Array(Vec::new())),
                }
            }
            "PUBLISH" => {
                arity(request, 2)?;
                Ok(Response::Integer(self.publish(&args[0], &args[1]) as i64))
            }
            "SUBSCRIBE" | "PSUBSCRIBE" => {
                arity(request, 1)?;
                let kind = name.to_ascii_lowercase();
                let mut acks = Vec::new();
                {
                    let mut subs = conn.subscriptions.lock();
                    for arg in args {
                        let target = String::from_utf8_lossy(arg).into_owned();
                        if name == "SUBSCRIBE" {
                            subs.channels.insert(target.clone());
                        } else {
                            subs.patterns.insert(target.clone());
                        }
                        acks.push(ack(&kind, &target, subs.count()));
                    }
                }
                for push in acks {
                    conn.push(push);
                }
                Ok(Response::Status("OK".into()))
            }
            "UNSUBSCRIBE" | "PUNSUBSCRIBE" => {
                let kind = name.to_ascii_lowercase();
                let mut acks = Vec::new();
                {
                    let mut subs = conn.subscriptions.lock();
                    let targets: Vec<String> = if args.is_empty() {
                        let set = if name == "UNSUBSCRIBE" {
                            &subs.channels
                        } else {
                            &subs.patterns
                        };
                        set.iter().cloned().collect()
                    } else {
                        args.iter()
                            .map(|a| String::from_utf8_lossy(a).into_owned())
                            .collect()
                    };
                    for target in targets {
                        if name == "UNSUBSCRIBE" {
                            subs.channels.remove(&target);
                        } else {
                            subs.patterns.remove(&target);
                        }
                        acks.push(ack(&kind, &target, subs.count()));
                    }
                }
                for push in acks {
                    conn.push(push);
                }
                Ok(Response::Status("OK".into()))
            }
            "FLUSHALL" => {
                self.data.lock().clear();
                Ok(Response::Status("OK".into()))
            }
            other => Err(RedisError::new(
                "ERR",
                format!("unknown command '{}'", other.to_ascii_lowercase()),
            )
            .into()),
        }
    }
}

#[derive(Default)]
struct Pool {
    closed: AtomicBool,
    active: AtomicUsize,
    connections: Mutex<Vec<Weak<ConnectionState>>>,
}

impl Pool {
    fn reserve(&self, limit: usize) -> bool {
        if limit == 0 {
            self.active.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

struct MemoryClient {
    id: u64,
    server: Arc<ServerState>,
    pool: Arc<Pool>,
}

impl TransportClient for MemoryClient {
    fn connect(&self) -> BoxFuture<'static, Result<Arc<dyn TransportConnection>, TransportError>> {
        let server = Arc::clone(&self.server);
        let pool = Arc::clone(&self.pool);
        let client = self.id;

        async move {
            server.connect_attempts.fetch_add(1, Ordering::SeqCst);
            if pool.closed.load(Ordering::SeqCst) {
                return Err(TransportError::io(
                    io::ErrorKind::NotConnected,
                    "client is closed",
                ));
            }
            let scripted = server.connect_failures.lock().pop_front();
            if let Some(error) = scripted {
                return Err(error);
            }
            if !server.reachable.load(Ordering::SeqCst) {
                return Err(TransportError::io(
                    io::ErrorKind::ConnectionRefused,
                    "Connection refused",
                ));
            }
            if !pool.reserve(server.pool_size.load(Ordering::SeqCst)) {
                return Err(TransportError::PoolExhausted);
            }

            let conn = Arc::new(ConnectionState {
                id: server.next_connection.fetch_add(1, Ordering::SeqCst),
                client,
                server: Arc::clone(&server),
                pool: Arc::clone(&pool),
                status: AtomicU8::new(OPEN),
                handlers: Mutex::new(Handlers::default()),
                subscriptions: Mutex::new(Subscriptions::default()),
            });
            server.connections.lock().push(Arc::downgrade(&conn));
            pool.connections.lock().push(Arc::downgrade(&conn));
            Ok(Arc::new(MemoryConnection { state: conn }) as Arc<dyn TransportConnection>)
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        if !self.pool.closed.swap(true, Ordering::SeqCst) {
            let conns: Vec<_> = self
                .pool
                .connections
                .lock()
                .drain(..)
                .filter_map(|weak| weak.upgrade())
                .collect();
            for conn in conns {
                conn.close_quietly();
            }
            self.server.closed_clients.lock().push(self.id);
            let observer = self.server.close_observer.lock().clone();
            if let Some(observer) = observer {
                observer(self.id);
            }
        }
        future::ready(()).boxed()
    }
}

#[derive(Default)]
struct Handlers {
    exception: Option<SharedException>,
    end: Option<SharedEnd>,
    message: Option<SharedMessage>,
}

#[derive(Default)]
struct Subscriptions {
    channels: HashSet<String>,
    patterns: HashSet<String>,
}

impl Subscriptions {
    fn count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

struct ConnectionState {
    id: u64,
    client: u64,
    server: Arc<ServerState>,
    pool: Arc<Pool>,
    status: AtomicU8,
    handlers: Mutex<Handlers>,
    subscriptions: Mutex<Subscriptions>,
}

impl ConnectionState {
    /// Moves an open connection to `status`, `false` if it was not open.
    fn mark(&self, status: u8) -> bool {
        self.status
            .compare_exchange(OPEN, status, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn close_quietly(&self) {
        if self.status.swap(CLOSED, Ordering::SeqCst) != CLOSED {
            self.pool.release();
            let mut subs = self.subscriptions.lock();
            subs.channels.clear();
            subs.patterns.clear();
        }
    }

    fn push(&self, message: Response) {
        let handler = self.handlers.lock().message.clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }

    fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        match self.status.load(Ordering::SeqCst) {
            CLOSED => {
                return Err(TransportError::io(
                    io::ErrorKind::NotConnected,
                    "connection is closed",
                ))
            }
            BROKEN => return Err(TransportError::io(io::ErrorKind::BrokenPipe, "Broken pipe")),
            _ => {}
        }
        self.server.log.lock().push(request.to_string());
        let scripted = self.server.failures.lock().pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }
        self.server.apply(self, request)
    }
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("id", &self.id)
            .field("client", &self.client)
            .field("status", &self.status.load(Ordering::SeqCst))
            .finish()
    }
}

struct MemoryConnection {
    state: Arc<ConnectionState>,
}

impl TransportConnection for MemoryConnection {
    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, TransportError>> {
        let outcome = self.state.execute(&request);
        let server = Arc::clone(&self.state.server);
        async move {
            server.wait_released().await;
            outcome
        }
        .boxed()
    }

    fn batch(
        &self,
        requests: Vec<Request>,
    ) -> BoxFuture<'static, Result<Vec<Response>, TransportError>> {
        let outcome = requests
            .iter()
            .map(|request| self.state.execute(request))
            .collect::<Result<Vec<_>, _>>();
        let server = Arc::clone(&self.state.server);
        async move {
            server.wait_released().await;
            outcome
        }
        .boxed()
    }

    fn exception_handler(&self, handler: ExceptionHandler) {
        self.state.handlers.lock().exception = Some(Arc::from(handler));
    }

    fn end_handler(&self, handler: EndHandler) {
        self.state.handlers.lock().end = Some(Arc::from(handler));
    }

    fn message_handler(&self, handler: MessageHandler) {
        self.state.handlers.lock().message = Some(Arc::from(handler));
    }

    fn close(&self) -> BoxFuture<'static, ()> {
        self.state.close_quietly();
        future::ready(()).boxed()
    }
}

fn arity(request: &Request, min: usize) -> Result<(), TransportError> {
    if request.arguments().len() < min {
        return Err(RedisError::new(
            "ERR",
            format!(
                "wrong number of arguments for '{}' command",
                request.command().name().to_ascii_lowercase()
            ),
        )
        .into());
    }
    Ok(())
}

fn wrong_type() -> TransportError {
    RedisError::new(
        "WRONGTYPE",
        "Operation against a key holding the wrong kind of value",
    )
    .into()
}

fn not_integer() -> TransportError {
    RedisError::new("ERR", "value is not an integer or out of range").into()
}

fn parse_index(raw: &[u8]) -> Result<i64, TransportError> {
    String::from_utf8_lossy(raw)
        .parse()
        .map_err(|_| not_integer())
}

fn range(len: usize, start: i64, stop: i64) -> std::ops::Range<usize> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        0..0
    } else {
        start as usize..(stop + 1) as usize
    }
}

fn ack(kind: &str, target: &str, count: usize) -> Response {
    Response::Array(vec![
        Response::bulk(kind),
        Response::bulk(target),
        Response::Integer(count as i64),
    ])
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}
