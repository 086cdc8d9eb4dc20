//! The configuration surface enumerated in spec.md §6: plain structs with
//! chained `with_*` setters that consume and return `Self`. No
//! builder-derive macro — the surface here is small enough that hand
//! written setters stay readable.

use std::time::Duration;

use crate::{policy::PolicyFactory, types::{Consistency, ProtocolVersion}};

#[cfg(feature = "rustls-tls")]
use crate::conn::stream::TlsConfig;

pub(crate) const DEFAULT_PORT: u16 = 9042;
pub(crate) const DEFAULT_MAX_STREAMS: u16 = 128;
pub(crate) const DEFAULT_MAX_CONNECTIONS: u32 = 1;
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_WAIT_QUEUE_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-connection settings: timeouts, stream budget, compression, and
/// authentication, matching spec.md §6's `connSettings`.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub(crate) connect_timeout: Duration,
    pub(crate) send_timeout: Duration,
    pub(crate) response_timeout: Duration,
    pub(crate) max_streams: u16,
    pub(crate) max_recv_buffer: usize,
    #[cfg(any(feature = "snappy-compression", feature = "lz4-compression"))]
    pub(crate) compression: Option<crate::compression::Compression>,
    #[cfg(feature = "rustls-tls")]
    pub(crate) tls: Option<TlsConfig>,
    pub(crate) default_keyspace: Option<String>,
    pub(crate) authenticator: Option<Authenticator>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_streams: DEFAULT_MAX_STREAMS,
            max_recv_buffer: 16 * 1024 * 1024,
            #[cfg(any(feature = "snappy-compression", feature = "lz4-compression"))]
            compression: None,
            #[cfg(feature = "rustls-tls")]
            tls: None,
            default_keyspace: None,
            authenticator: None,
        }
    }
}

impl ConnectionSettings {
    pub fn with_connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn with_send_timeout(mut self, d: Duration) -> Self {
        self.send_timeout = d;
        self
    }

    pub fn with_response_timeout(mut self, d: Duration) -> Self {
        self.response_timeout = d;
        self
    }

    pub fn with_max_streams(mut self, n: u16) -> Self {
        self.max_streams = n;
        self
    }

    pub fn with_default_keyspace(mut self, ks: impl Into<String>) -> Self {
        self.default_keyspace = Some(ks.into());
        self
    }

    #[cfg(feature = "rustls-tls")]
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// A username/password authenticator for CQL's SASL-style auth exchange.
#[derive(Clone)]
pub struct Authenticator {
    pub username: String,
    pub password: String,
}

/// Bounded per-host connection pool configuration (spec.md §6's
/// `poolSettings`).
#[derive(Clone, Copy)]
pub struct PoolSettings {
    pub(crate) max_connections: u32,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) wait_queue_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            wait_queue_timeout: DEFAULT_WAIT_QUEUE_TIMEOUT,
        }
    }
}

impl PoolSettings {
    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn with_idle_timeout(mut self, d: Option<Duration>) -> Self {
        self.idle_timeout = d;
        self
    }

    pub fn with_wait_queue_timeout(mut self, d: Duration) -> Self {
        self.wait_queue_timeout = d;
        self
    }
}

/// Retry behaviour for the request dispatcher (spec.md §6's
/// `retrySettings`): how many attempts, how timeouts shift per attempt,
/// and an optional consistency downgrade for attempts after the first.
#[derive(Clone)]
pub struct RetrySettings {
    pub(crate) max_attempts: u32,
    pub(crate) backoff_base: Duration,
    pub(crate) backoff_cap: Duration,
    pub(crate) send_timeout_delta: i64,
    pub(crate) recv_timeout_delta: i64,
    pub(crate) reduced_consistency: Option<Consistency>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_secs(5),
            send_timeout_delta: 0,
            recv_timeout_delta: 0,
            reduced_consistency: None,
        }
    }
}

impl RetrySettings {
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_reduced_consistency(mut self, c: Consistency) -> Self {
        self.reduced_consistency = Some(c);
        self
    }
}

/// Whether a prepared query is prepared against one host on first use
/// (`LazyPrepare`) or eagerly against every currently-selectable host
/// (`EagerPrepare`), per spec.md §4.10.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareStrategy {
    LazyPrepare,
    EagerPrepare,
}

/// Top-level cluster configuration: contacts, port, and every nested
/// settings group, plus the protocol version and the load-balancing policy
/// factory.
#[derive(Clone)]
pub struct ClusterConfig {
    pub(crate) contacts: Vec<String>,
    pub(crate) port: u16,
    pub(crate) connection: ConnectionSettings,
    pub(crate) pool: PoolSettings,
    pub(crate) retry: RetrySettings,
    pub(crate) protocol_version: ProtocolVersion,
    pub(crate) prepare_strategy: PrepareStrategy,
    pub(crate) policy_factory: PolicyFactory,
}

impl ClusterConfig {
    /// `contacts` must be non-empty per spec.md §6.
    pub fn new(contacts: Vec<String>) -> Self {
        assert!(!contacts.is_empty(), "contacts must be non-empty");
        Self {
            contacts,
            port: DEFAULT_PORT,
            connection: ConnectionSettings::default(),
            pool: PoolSettings::default(),
            retry: RetrySettings::default(),
            protocol_version: ProtocolVersion::V4,
            prepare_strategy: PrepareStrategy::LazyPrepare,
            policy_factory: PolicyFactory::round_robin(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connection_settings(mut self, s: ConnectionSettings) -> Self {
        self.connection = s;
        self
    }

    pub fn with_pool_settings(mut self, s: PoolSettings) -> Self {
        self.pool = s;
        self
    }

    pub fn with_retry_settings(mut self, s: RetrySettings) -> Self {
        self.retry = s;
        self
    }

    pub fn with_protocol_version(mut self, v: ProtocolVersion) -> Self {
        self.protocol_version = v;
        self
    }

    pub fn with_prepare_strategy(mut self, s: PrepareStrategy) -> Self {
        self.prepare_strategy = s;
        self
    }

    pub fn with_policy_factory(mut self, f: PolicyFactory) -> Self {
        self.policy_factory = f;
        self
    }

    /// Resolves the open question in spec.md §9: validate `max_streams`
    /// against the negotiated protocol version's ceiling rather than
    /// silently truncating it.
    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        let ceiling = self.protocol_version.max_stream_ceiling();
        if self.connection.max_streams > ceiling {
            return Err(crate::error::ErrorKind::InvalidCacheSize(self.connection.max_streams as usize).into());
        }
        Ok(())
    }
}
