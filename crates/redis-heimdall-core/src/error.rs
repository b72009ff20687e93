//! Error taxonomy shared by every heimdall client.
//!
//! Failures crossing the public boundary carry a [`Reason`] from a closed set.
//! The only exception are errors the Redis server itself replied with
//! (`WRONGTYPE`, `ERR ...`), which are handed to callers unchanged as
//! [`Error::Redis`].

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::transport::RedisError;

/// Shared, clonable error cause.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Why a heimdall operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// The operation is not available on this kind of client.
    UnsupportedAction,
    /// A failure inside heimdall itself.
    Internal,
    /// The client is reconnecting and rejects access until it is done.
    AccessDuringReconnect,
    /// The reconnect budget was used up without reaching the server.
    MaxAttemptsReached,
    /// The connection broke and reconnecting is switched off.
    ReconnectDisabled,
    /// The connection to the server was lost or could not be established.
    ConnectionIssue,
    /// The connection pool is exhausted.
    ClientBusy,
    /// A subscription client could not subscribe its initial channels.
    UnableToStart,
    /// Unclassified failure.
    Unspecified,
}

impl Reason {
    /// Returns the wire-stable name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::UnsupportedAction => "UNSUPPORTED_ACTION",
            Reason::Internal => "INTERNAL",
            Reason::AccessDuringReconnect => "ACCESS_DURING_RECONNECT",
            Reason::MaxAttemptsReached => "MAX_ATTEMPTS_REACHED",
            Reason::ReconnectDisabled => "RECONNECT_DISABLED",
            Reason::ConnectionIssue => "CONNECTION_ISSUE",
            Reason::ClientBusy => "CLIENT_BUSY",
            Reason::UnableToStart => "UNABLE_TO_START",
            Reason::Unspecified => "UNSPECIFIED",
        }
    }

    /// Only a connection issue starts a reconnect episode.
    pub fn triggers_reconnect(&self) -> bool {
        matches!(self, Reason::ConnectionIssue)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A heimdall failure: a [`Reason`], an optional message and an optional cause.
///
/// The cause is reference counted so one failure can be handed to every
/// command waiting on a broken connection.
#[derive(Clone)]
pub struct HeimdallError {
    reason: Reason,
    message: Option<String>,
    cause: Option<Cause>,
}

impl HeimdallError {
    /// Creates an error without message or cause.
    pub fn new(reason: Reason) -> Self {
        Self {
            reason,
            message: None,
            cause: None,
        }
    }

    /// Shorthand for `HeimdallError::new(reason).with_message(message)`.
    pub fn with_reason(reason: Reason, message: impl Into<String>) -> Self {
        Self::new(reason).with_message(message)
    }

    /// Attaches a human readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches the underlying cause.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        self.cause = Some(Arc::from(cause.into()));
        self
    }

    /// Attaches an already shared cause.
    pub fn with_shared_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Returns `true` for [`Reason::ConnectionIssue`].
    pub fn is_connection_issue(&self) -> bool {
        self.reason == Reason::ConnectionIssue
    }

    /// Renders the error and its whole cause chain on one line.
    ///
    /// Used as payload of reconnect notifications.
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        let mut next = StdError::source(self);
        while let Some(cause) = next {
            out.push_str(" | caused by: ");
            out.push_str(&cause.to_string());
            next = cause.source();
        }
        out
    }
}

impl fmt::Debug for HeimdallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeimdallError")
            .field("reason", &self.reason)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for HeimdallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.reason, message),
            None => write!(f, "{}", self.reason),
        }
    }
}

impl StdError for HeimdallError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<Reason> for HeimdallError {
    fn from(reason: Reason) -> Self {
        HeimdallError::new(reason)
    }
}

/// Error returned to callers of a heimdall client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Classified heimdall failure.
    #[error(transparent)]
    Heimdall(#[from] HeimdallError),

    /// Error reply of the Redis server, passed through unchanged.
    #[error(transparent)]
    Redis(#[from] RedisError),
}

impl Error {
    /// The heimdall reason, `None` for server error replies.
    pub fn reason(&self) -> Option<Reason> {
        match self {
            Error::Heimdall(e) => Some(e.reason()),
            Error::Redis(_) => None,
        }
    }

    pub fn is_reason(&self, reason: Reason) -> bool {
        self.reason() == Some(reason)
    }

    pub fn as_heimdall(&self) -> Option<&HeimdallError> {
        match self {
            Error::Heimdall(e) => Some(e),
            Error::Redis(_) => None,
        }
    }

    pub fn as_redis(&self) -> Option<&RedisError> {
        match self {
            Error::Redis(e) => Some(e),
            Error::Heimdall(_) => None,
        }
    }

    /// Server replies become `UNSPECIFIED` with the reply as cause.
    pub fn into_heimdall(self) -> HeimdallError {
        match self {
            Error::Heimdall(e) => e,
            Error::Redis(e) => HeimdallError::new(Reason::Unspecified)
                .with_message("unexpected error reply")
                .with_cause(e),
        }
    }
}

impl From<Reason> for Error {
    fn from(reason: Reason) -> Self {
        Error::Heimdall(HeimdallError::new(reason))
    }
}
