//! Contains the [`Error`] and [`Result`] types that this crate uses.

use std::{fmt, io, net::SocketAddr, sync::Arc};

use thiserror::Error;

use crate::types::InetAddr;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while talking to a Cassandra cluster.
///
/// The inner [`ErrorKind`] is wrapped in an `Arc` so that `Error` is cheaply
/// `Clone`: a single failure is often delivered to several waiters at once
/// (every pending stream-slot waiter, every ticket-pool waiter, every
/// in-flight retry), and cloning an `Arc` is the only way to do that without
/// an awkward ownership dance.
#[derive(Clone, Debug, Error)]
#[error("cql-io: {kind}")]
pub struct Error {
    kind: Arc<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Arc::new(kind),
        }
    }

    /// The classified kind of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Whether the retry engine should treat this error as retryable per §7
    /// of the driver's retry policy.
    pub(crate) fn is_retryable_server_error(&self) -> bool {
        matches!(
            &*self.kind,
            ErrorKind::Server(ServerErrorKind::ReadTimeout)
                | ErrorKind::Server(ServerErrorKind::WriteTimeout)
                | ErrorKind::Server(ServerErrorKind::Overloaded)
                | ErrorKind::Server(ServerErrorKind::Unavailable)
                | ErrorKind::Server(ServerErrorKind::ServerError)
        )
    }

    pub(crate) fn connection_closed(addr: InetAddr) -> Self {
        Self::new(ErrorKind::ConnectionClosed(addr))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::new(ErrorKind::Io(Arc::new(e)))
    }
}

/// Classification of every error this crate can produce. Kinds, not type
/// names, are the contract: callers match on `ErrorKind`, never on the
/// `Display` string.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ErrorKind {
    // -- Configuration --
    #[error("compression algorithm {0:?} is not supported by the server")]
    UnsupportedCompression(String),
    #[error("invalid cache size: {0}")]
    InvalidCacheSize(usize),

    // -- Connection --
    #[error("connection to {0} is closed")]
    ConnectionClosed(InetAddr),
    #[error("timed out connecting to {0}")]
    ConnectTimeout(InetAddr),
    #[error("timed out waiting for a response from {0}")]
    ResponseTimeout(InetAddr),

    // -- Host selection --
    #[error("no host was available to serve the request")]
    NoHostAvailable,
    #[error("all candidate hosts were busy")]
    HostsBusy,

    // -- Session lifecycle --
    #[error("the session has already been shut down")]
    SessionClosed,

    // -- Protocol --
    #[error("failed to parse a frame: {0}")]
    ParseError(String),
    #[error("unexpected response from {host}: {response}")]
    UnexpectedResponse { host: InetAddr, response: String },
    #[error("internal error: {0}")]
    InternalError(String),

    // -- Auth --
    #[error("the server requires authentication ({0})")]
    AuthenticationRequired(String),
    #[error("the server requested an unsupported authentication mechanism: {0}")]
    AuthenticationMechanismUnsupported(String),
    #[error("unexpected authentication challenge during {0}")]
    UnexpectedAuthenticationChallenge(String),

    // -- Server (carried in a Response outside of the retry engine) --
    #[error("server error: {0:?}")]
    Server(ServerErrorKind),

    // -- Transport --
    #[error(transparent)]
    Io(Arc<io::Error>),
    #[error("tls error: {0}")]
    Tls(String),
    #[error("dns lookup for {0} produced no results")]
    NoDnsResults(String),
}

/// The server's own error taxonomy, carried either inside a `Response` or,
/// while inside the retry engine, rethrown as an [`Error`] so the retry
/// policy can see it (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ServerErrorKind {
    ServerError,
    ProtocolError,
    AuthenticationError,
    Unavailable,
    Overloaded,
    IsBootstrapping,
    TruncateError,
    WriteTimeout,
    ReadTimeout,
    ReadFailure,
    FunctionFailure,
    WriteFailure,
    SyntaxError,
    Unauthorized,
    Invalid,
    ConfigError,
    AlreadyExists,
    Unprepared,
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub(crate) fn connect_error(addr: SocketAddr) -> Error {
    ErrorKind::ConnectTimeout(InetAddr::from(addr)).into()
}
