//! The transport contract heimdall sits on.
//!
//! Heimdall does not speak the Redis protocol itself. It drives an
//! implementation of [`Transport`], which creates clients bound to a set of
//! endpoints. A client hands out [`TransportConnection`]s that send commands
//! and report asynchronous failures through registered handlers.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{Cause, HeimdallError};

/// Name of a Redis command, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(Cow<'static, str>);

impl Command {
    pub const PING: Command = Command(Cow::Borrowed("PING"));
    pub const ECHO: Command = Command(Cow::Borrowed("ECHO"));
    pub const GET: Command = Command(Cow::Borrowed("GET"));
    pub const SET: Command = Command(Cow::Borrowed("SET"));
    pub const DEL: Command = Command(Cow::Borrowed("DEL"));
    pub const INCR: Command = Command(Cow::Borrowed("INCR"));
    pub const RPUSH: Command = Command(Cow::Borrowed("RPUSH"));
    pub const LRANGE: Command = Command(Cow::Borrowed("LRANGE"));
    pub const PUBLISH: Command = Command(Cow::Borrowed("PUBLISH"));
    pub const SUBSCRIBE: Command = Command(Cow::Borrowed("SUBSCRIBE"));
    pub const UNSUBSCRIBE: Command = Command(Cow::Borrowed("UNSUBSCRIBE"));
    pub const PSUBSCRIBE: Command = Command(Cow::Borrowed("PSUBSCRIBE"));
    pub const PUNSUBSCRIBE: Command = Command(Cow::Borrowed("PUNSUBSCRIBE"));

    /// Creates a command from its name, normalising to upper case.
    pub fn new(name: &str) -> Self {
        Command(Cow::Owned(name.to_ascii_uppercase()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Commands that switch a connection into subscription mode or act on it.
    pub fn is_pub_sub(&self) -> bool {
        matches!(
            self.name(),
            "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE"
        )
    }
}

impl From<&str> for Command {
    fn from(name: &str) -> Self {
        Command::new(name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A command with its arguments.
///
/// ```
/// use redis_heimdall_core::{Command, Request};
///
/// let request = Request::cmd(Command::SET).arg("greeting").arg("hello");
/// assert_eq!(request.to_string(), "SET greeting hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    command: Command,
    args: Vec<Vec<u8>>,
}

impl Request {
    pub fn cmd(command: impl Into<Command>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument of the iterator.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn arguments(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Argument `index` decoded as UTF-8 (lossy).
    pub fn arg_str(&self, index: usize) -> Option<Cow<'_, str>> {
        self.args.get(index).map(|a| String::from_utf8_lossy(a))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, " {}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

/// A reply from the server, or a message pushed on a subscribed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Status(String),
    Bulk(Vec<u8>),
    Integer(i64),
    Array(Vec<Response>),
    Nil,
}

impl Response {
    pub fn bulk(value: impl Into<Vec<u8>>) -> Self {
        Response::Bulk(value.into())
    }

    /// Textual value of a status or bulk reply.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Response::Status(s) => Some(s.clone()),
            Response::Bulk(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Response::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Response]> {
        match self {
            Response::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Element `index` of an array reply.
    pub fn get(&self, index: usize) -> Option<&Response> {
        self.as_array().and_then(|items| items.get(index))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Response::Nil)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Status(s) => f.write_str(s),
            Response::Bulk(b) => f.write_str(&String::from_utf8_lossy(b)),
            Response::Integer(i) => write!(f, "{i}"),
            Response::Nil => f.write_str("nil"),
            Response::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// An error reply: a tag such as `WRONGTYPE` followed by a detail text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisError {
    kind: String,
    detail: String,
}

impl RedisError {
    /// Tag used by transports when the server forcibly closed the connection.
    pub const CONNECTION_CLOSED: &'static str = "CONNECTION_CLOSED";

    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }

    /// Splits a raw error line into tag and detail.
    pub fn parse(line: &str) -> Self {
        match line.split_once(' ') {
            Some((kind, detail)) => Self::new(kind, detail),
            None => Self::new(line, ""),
        }
    }

    pub fn connection_closed() -> Self {
        Self::new(Self::CONNECTION_CLOSED, "connection closed by server")
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_connection_closed(&self) -> bool {
        self.kind == Self::CONNECTION_CLOSED
    }
}

impl fmt::Display for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{} {}", self.kind, self.detail)
        }
    }
}

impl std::error::Error for RedisError {}

/// Failure reported by a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Error reply of the server, including `CONNECTION_CLOSED`.
    #[error(transparent)]
    Redis(#[from] RedisError),

    /// Socket level failure.
    #[error(transparent)]
    Io(Arc<io::Error>),

    /// No connection is available in the pool.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// A failure that was already classified further down.
    #[error(transparent)]
    Heimdall(#[from] HeimdallError),

    #[error(transparent)]
    Other(Cause),
}

impl TransportError {
    pub fn io(kind: io::ErrorKind, message: &str) -> Self {
        TransportError::Io(Arc::new(io::Error::new(kind, message.to_string())))
    }

    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        TransportError::Other(Arc::from(error.into()))
    }

    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            TransportError::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(error: io::Error) -> Self {
        TransportError::Io(Arc::new(error))
    }
}

/// Callback for asynchronous transport failures.
pub type ExceptionHandler = Box<dyn Fn(TransportError) + Send + Sync>;

/// Callback for the end of the connection stream.
pub type EndHandler = Box<dyn Fn() + Send + Sync>;

/// Callback for messages pushed by the server.
pub type MessageHandler = Box<dyn Fn(Response) + Send + Sync>;

/// Creates clients bound to a set of endpoints.
pub trait Transport: Send + Sync + 'static {
    fn create_client(&self, endpoints: &[String]) -> Arc<dyn TransportClient>;
}

/// A client of one or more Redis endpoints, usually backed by a pool.
pub trait TransportClient: Send + Sync {
    /// Obtains a connection. Fails with [`TransportError::PoolExhausted`] when
    /// the pool has no connection left.
    fn connect(&self) -> BoxFuture<'static, Result<Arc<dyn TransportConnection>, TransportError>>;

    /// Closes the client and every connection it handed out.
    fn close(&self) -> BoxFuture<'static, ()>;
}

/// A command issuing connection.
///
/// `send` and `batch` put the command on the wire when they are called; the
/// returned future only waits for the reply.
pub trait TransportConnection: Send + Sync {
    fn send(&self, request: Request) -> BoxFuture<'static, Result<Response, TransportError>>;

    /// Sends several commands in one round trip.
    fn batch(
        &self,
        requests: Vec<Request>,
    ) -> BoxFuture<'static, Result<Vec<Response>, TransportError>>;

    /// Replaces the handler for asynchronous failures.
    fn exception_handler(&self, handler: ExceptionHandler);

    /// Replaces the handler called when the stream ends.
    fn end_handler(&self, handler: EndHandler);

    /// Replaces the handler for pushed messages.
    fn message_handler(&self, handler: MessageHandler);

    /// Closes the connection, returning it to its pool where there is one.
    fn close(&self) -> BoxFuture<'static, ()>;
}
