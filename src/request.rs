//! Request dispatcher (spec.md §4.10): selects a host via the
//! load-balancing policy, executes with retries, re-prepares queries on
//! demand, and mutates consistency/timeouts on retry. The host-exhaustion
//! loop (`requestN`) is nested inside the attempt loop (`withRetries`): a
//! select-host / try-operation / classify-and-maybe-retry shape repeated
//! once per attempt.
//!
//! Because CQL value (de)serialization is an external collaborator (§1),
//! a [`Request`] carries its body as a caller-supplied encoding closure
//! parameterized over [`Consistency`] rather than a fixed byte buffer, so
//! the retry engine can rewrite consistency on a later attempt without
//! itself understanding the query/value wire format.

use std::{sync::Arc, time::Duration};

use crate::{
    conn::{
        wire::{self, Frame, Opcode},
        Connection,
    },
    config::{ConnectionSettings, PoolSettings, PrepareStrategy},
    error::{Error, ErrorKind, Result, ServerErrorKind},
    event::{EventEmitter, PoolEvent},
    policy::LoadBalancingPolicy,
    pool::ConnectionPool,
    prepare::PreparedCache,
    retry::RetryPolicy,
    topology::HostMap,
    types::{Consistency, Host, InetAddr, ProtocolVersion},
};

/// A single logical request: an opcode, the consistency it was issued at,
/// and a closure that (re-)encodes the full frame body for a given
/// consistency. `encode` is called once per attempt so a retry at a
/// downgraded consistency produces a correctly re-encoded body.
#[derive(Clone)]
pub struct Request {
    pub(crate) opcode: Opcode,
    pub(crate) consistency: Consistency,
    pub(crate) encode: Arc<dyn Fn(Consistency) -> Vec<u8> + Send + Sync>,
}

impl Request {
    pub(crate) fn new(
        opcode: Opcode,
        consistency: Consistency,
        encode: impl Fn(Consistency) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        Self { opcode, consistency, encode: Arc::new(encode) }
    }

    /// A plain QUERY request. `encode` receives the (possibly downgraded,
    /// on retry) consistency and must return the full QUERY body -
    /// `[long string] query` plus whatever bound-value encoding the caller's
    /// own CQL value codec produces, since that encoding is out of scope
    /// for this crate (spec.md §1).
    pub fn query(consistency: Consistency, encode: impl Fn(Consistency) -> Vec<u8> + Send + Sync + 'static) -> Self {
        Self::new(Opcode::Query, consistency, encode)
    }

    /// A BATCH request, built the same way as [`Request::query`] but
    /// tagged with the BATCH opcode.
    pub fn batch(consistency: Consistency, encode: impl Fn(Consistency) -> Vec<u8> + Send + Sync + 'static) -> Self {
        Self::new(Opcode::Batch, consistency, encode)
    }
}

pub(crate) struct RequestDispatcher {
    policy: Arc<dyn LoadBalancingPolicy>,
    hosts: Arc<HostMap>,
    prepared: Arc<PreparedCache>,
    retry: RetryPolicy,
    version: ProtocolVersion,
    conn_settings: ConnectionSettings,
    pool_settings: PoolSettings,
    prepare_strategy: PrepareStrategy,
    emitter: EventEmitter,
    on_connection_error: Box<dyn Fn(InetAddr) + Send + Sync>,
}

impl RequestDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        policy: Arc<dyn LoadBalancingPolicy>,
        hosts: Arc<HostMap>,
        prepared: Arc<PreparedCache>,
        retry: RetryPolicy,
        version: ProtocolVersion,
        conn_settings: ConnectionSettings,
        pool_settings: PoolSettings,
        prepare_strategy: PrepareStrategy,
        emitter: EventEmitter,
        on_connection_error: impl Fn(InetAddr) + Send + Sync + 'static,
    ) -> Self {
        Self {
            policy,
            hosts,
            prepared,
            retry,
            version,
            conn_settings,
            pool_settings,
            prepare_strategy,
            emitter,
            on_connection_error: Box::new(on_connection_error),
        }
    }

    /// Top-level entry point (spec.md §4.10 step 1-2): bound the
    /// per-attempt host-selection loop by `policy.host_count()`, then run
    /// the retry loop around it.
    pub(crate) async fn request(&self, req: Request) -> Result<Frame> {
        let n = self.policy.host_count().max(1);
        self.with_retries(n, req).await
    }

    async fn with_retries(&self, n: usize, req: Request) -> Result<Frame> {
        let mut attempt = 0u32;

        loop {
            let send_timeout = self.retry.adjust_send_timeout(attempt, self.conn_settings.send_timeout);
            let response_timeout = self.retry.adjust_response_timeout(attempt, self.conn_settings.response_timeout);
            let consistency = self.retry.consistency_for(attempt, req.consistency);
            let body = (req.encode)(consistency);

            let frame = self.request_n(n, req.opcode, body, send_timeout, response_timeout).await?;
            match wire::classify_error(&frame)? {
                None => return Ok(frame),
                Some(kind) => {
                    let err: Error = ErrorKind::Server(kind).into();
                    if self.retry.is_retryable(&err) && attempt + 1 < self.retry.max_attempts() {
                        attempt += 1;
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                        continue;
                    }
                    // Non-retryable, or retryable but exhausted: a server
                    // error response must not escape as an exception
                    // (spec.md §4.10 steps 6-7 / §7 / §8), so the ERROR
                    // frame is handed back to the caller as a Response.
                    return Ok(frame);
                }
            }
        }
    }

    /// `requestN`: pick a host via the policy, try it, and on "no
    /// connection available" recurse with one fewer candidate until
    /// exhausted (spec.md §4.10 step 4).
    fn request_n<'a>(
        &'a self,
        remaining: usize,
        opcode: Opcode,
        body: Vec<u8>,
        send_timeout: Duration,
        response_timeout: Duration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Frame>> + Send + 'a>> {
        Box::pin(async move {
            if remaining == 0 {
                return Err(ErrorKind::HostsBusy.into());
            }
            let Some(host) = self.policy.select() else {
                return Err(ErrorKind::NoHostAvailable.into());
            };
            match self.request_1(&host, opcode, body.clone(), send_timeout, response_timeout).await {
                Ok(frame) => Ok(frame),
                Err(e) if matches!(e.kind(), ErrorKind::HostsBusy) => {
                    self.request_n(remaining - 1, opcode, body, send_timeout, response_timeout).await
                }
                Err(e) => Err(e),
            }
        })
    }

    /// `request1`: look up (or lazily create) the pool for `host`, acquire
    /// a connection, send, and on a connection-level failure invoke
    /// `onConnectionError` before rethrowing (spec.md §4.10 step 5).
    async fn request_1(
        &self,
        host: &Host,
        opcode: Opcode,
        body: Vec<u8>,
        send_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Frame> {
        let addr = host.addr;
        let version = self.version;
        let conn_settings = self.conn_settings.clone();
        let pool_settings = self.pool_settings;
        let emitter = self.emitter.clone();

        let pool = self
            .hosts
            .pool_or_create(addr, || ConnectionPool::create(addr, version, conn_settings.clone(), pool_settings, emitter.clone()))
            .ok_or_else(|| -> Error { ErrorKind::HostsBusy.into() })?;

        let result = pool
            .with(move |conn: Connection| async move { conn.request(opcode, body, send_timeout, response_timeout).await })
            .await;

        if let Err(e) = &result {
            if is_connection_error(e) {
                (self.on_connection_error)(addr);
                self.emitter.emit_pool(PoolEvent::CheckoutFailed { addr });
                self.policy.on_event(&crate::types::HostEvent::Down(addr));
                self.hosts.mark_down(addr);
            }
        }
        result
    }

    /// Prepared-query execution path (spec.md §4.10's "Prepared-query
    /// path"): look up the cached QueryId, preparing (lazily or eagerly)
    /// against a policy-selected host if missing, then EXECUTE; on
    /// Unprepared, re-prepare against the *same host that raised it* and
    /// retry once with unchanged params (spec.md §8's round-trip law).
    pub(crate) async fn execute_prepared(
        &self,
        query_text: &str,
        consistency: Consistency,
        encode_execute: Arc<dyn Fn(&[u8], Consistency) -> Vec<u8> + Send + Sync>,
    ) -> Result<Frame> {
        let id = match self.prepared.lookup_by_query(query_text) {
            Some(id) => id,
            None => self.prepare(query_text).await?,
        };
        self.execute_with_id(query_text, id, consistency, encode_execute).await
    }

    /// Host-pinning note: ordinary retries (attempt index bumped on a
    /// retryable server error) are free to land on a different host each
    /// time, exactly like the generic `request` path — only the single
    /// Unprepared-triggered re-prepare-and-retry step below is pinned to
    /// the host that raised it, per spec.md §4.10.
    async fn execute_with_id(
        &self,
        query_text: &str,
        mut id: Vec<u8>,
        consistency: Consistency,
        encode_execute: Arc<dyn Fn(&[u8], Consistency) -> Vec<u8> + Send + Sync>,
    ) -> Result<Frame> {
        let mut attempt = 0u32;
        let mut remaining_hosts = self.policy.host_count().max(1);

        loop {
            let send_timeout = self.retry.adjust_send_timeout(attempt, self.conn_settings.send_timeout);
            let response_timeout = self.retry.adjust_response_timeout(attempt, self.conn_settings.response_timeout);
            let attempt_consistency = self.retry.consistency_for(attempt, consistency);

            let Some(host) = self.policy.select() else {
                return Err(ErrorKind::NoHostAvailable.into());
            };
            let body = encode_execute(&id, attempt_consistency);

            match self.request_1(&host, Opcode::Execute, body, send_timeout, response_timeout).await {
                Err(e) if matches!(e.kind(), ErrorKind::HostsBusy) && remaining_hosts > 1 => {
                    remaining_hosts -= 1;
                    continue;
                }
                Err(e) => return Err(e),
                Ok(frame) => match wire::classify_error(&frame)? {
                    None => return Ok(frame),
                    Some(ServerErrorKind::Unprepared) => {
                        let text = self.prepared.lookup_by_id(&id).unwrap_or_else(|| query_text.to_string());
                        id = self.prepare_on_host(&host, &text, send_timeout, response_timeout).await?;
                        let retry_body = encode_execute(&id, attempt_consistency);
                        return self.request_1(&host, Opcode::Execute, retry_body, send_timeout, response_timeout).await;
                    }
                    Some(kind) => {
                        let err: Error = ErrorKind::Server(kind).into();
                        if self.retry.is_retryable(&err) && attempt + 1 < self.retry.max_attempts() {
                            attempt += 1;
                            tokio::time::sleep(self.retry.backoff(attempt)).await;
                            continue;
                        }
                        // Non-retryable, or retryable but exhausted: deliver
                        // the server's ERROR frame as a Response instead of
                        // an exception (spec.md §4.10 steps 6-7 / §7 / §8).
                        return Ok(frame);
                    }
                },
            }
        }
    }

    async fn prepare(&self, query_text: &str) -> Result<Vec<u8>> {
        let body = encode_prepare_body(query_text);

        match self.prepare_strategy {
            PrepareStrategy::LazyPrepare => {
                let req = Request::new(Opcode::Prepare, Consistency::One, move |_| body.clone());
                let frame = self.request(req).await?;
                let id = parse_prepared_id(&frame)?;
                self.prepared.insert(query_text, id.clone())?;
                Ok(id)
            }
            PrepareStrategy::EagerPrepare => {
                let hosts = self.policy.current();
                let mut last_err = None;
                for host in hosts {
                    match self
                        .request_1(&host, Opcode::Prepare, body.clone(), self.conn_settings.send_timeout, self.conn_settings.response_timeout)
                        .await
                    {
                        Ok(frame) => {
                            let id = parse_prepared_id(&frame)?;
                            self.prepared.insert(query_text, id.clone())?;
                            return Ok(id);
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| ErrorKind::NoHostAvailable.into()))
            }
        }
    }

    /// Re-prepares `query_text` against a single, caller-chosen host (the
    /// host that raised Unprepared), rather than going through
    /// policy-driven host selection again.
    async fn prepare_on_host(&self, host: &Host, query_text: &str, send_timeout: Duration, response_timeout: Duration) -> Result<Vec<u8>> {
        let body = encode_prepare_body(query_text);
        let frame = self.request_1(host, Opcode::Prepare, body, send_timeout, response_timeout).await?;
        let id = parse_prepared_id(&frame)?;
        self.prepared.insert(query_text, id.clone())?;
        Ok(id)
    }
}

/// Connection/IO/TLS errors trip `onConnectionError` (spec.md §4.10 step
/// 5); server errors carried in a normal response (even retryable ones)
/// do not, since they say nothing about the connection's health.
fn is_connection_error(err: &Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionClosed(_) | ErrorKind::ConnectTimeout(_) | ErrorKind::ResponseTimeout(_) | ErrorKind::Io(_) | ErrorKind::Tls(_)
    )
}

fn encode_prepare_body(query_text: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + query_text.len());
    body.extend_from_slice(&(query_text.len() as u32).to_be_bytes());
    body.extend_from_slice(query_text.as_bytes());
    body
}

/// Extracts the opaque QueryId from a PREPARE response. The surrounding
/// metadata (bind variable column specs) is CQL-value territory and out
/// of scope (§1); only the id, needed to key the prepared cache, is read.
fn parse_prepared_id(frame: &Frame) -> Result<Vec<u8>> {
    // A PREPARE that the server rejects (bad CQL, unauthorized, ...) must
    // fail outright rather than hand back an opaque QueryId, unlike the
    // QUERY/EXECUTE path where an ERROR frame is a valid Response.
    if let Some(kind) = wire::classify_error(frame)? {
        return Err(ErrorKind::Server(kind).into());
    }
    if frame.opcode != Opcode::Result {
        return Err(ErrorKind::ParseError("unexpected reply to PREPARE".into()).into());
    }
    let body = &frame.body;
    if body.len() < 4 {
        return Err(ErrorKind::ParseError("truncated PREPARE result".into()).into());
    }
    let kind = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    const PREPARED_KIND: u32 = 0x0004;
    if kind != PREPARED_KIND {
        return Err(ErrorKind::ParseError("PREPARE result was not a Prepared kind".into()).into());
    }
    let id_len = body
        .get(4..6)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        .ok_or_else(|| ErrorKind::ParseError("truncated PREPARE result".into()))?;
    body.get(6..6 + id_len)
        .map(|b| b.to_vec())
        .ok_or_else(|| ErrorKind::ParseError("truncated PREPARE result".into()).into())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conn::wire::FrameFlags;

    fn error_frame(code: u32) -> Frame {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(&0u16.to_be_bytes());
        Frame {
            version: ProtocolVersion::V4.as_u8(),
            flags: FrameFlags::empty(),
            stream: 0,
            opcode: Opcode::Error,
            body,
        }
    }

    #[test]
    fn connection_errors_are_distinguished_from_server_errors() {
        let addr = InetAddr::new("127.0.0.1:9042".parse().unwrap());
        assert!(is_connection_error(&ErrorKind::ConnectionClosed(addr).into()));
        assert!(!is_connection_error(&ErrorKind::Server(ServerErrorKind::Overloaded).into()));
    }

    #[test]
    fn classify_error_distinguishes_unprepared_from_other_server_kinds() {
        let unprepared = crate::conn::wire::classify_error(&error_frame(0x2500)).unwrap();
        assert!(matches!(unprepared, Some(ServerErrorKind::Unprepared)));
        let overloaded = crate::conn::wire::classify_error(&error_frame(0x1001)).unwrap();
        assert!(matches!(overloaded, Some(ServerErrorKind::Overloaded)));
    }

    #[test]
    fn prepare_body_is_length_prefixed() {
        let body = encode_prepare_body("SELECT 1");
        assert_eq!(u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize, "SELECT 1".len());
    }
}
