//! The crate's entry point (spec.md §3's `ClientState`): an `Arc`-wrapped
//! handle, built once by connecting and cloned freely across tasks
//! thereafter. One [`Session`] owns the [`topology::HostMap`], the
//! background [`Controller`], the prepared-statement cache, and a
//! [`RequestDispatcher`] that ties them together for every request a
//! caller issues.

use std::sync::{atomic::AtomicBool, Arc};

use crate::{
    conn::wire::Frame,
    config::ClusterConfig,
    control::Controller,
    error::{ErrorKind, Result},
    event::EventHandler,
    jobs::JobsRegistry,
    prepare::PreparedCache,
    request::{Request, RequestDispatcher},
    retry::RetryPolicy,
    topology::HostMap,
    types::{Consistency, Host},
};

/// The raw reply to a request: the RESULT frame's body, unparsed. CQL value
/// (de)serialization is out of this crate's scope (spec.md §1); a caller's
/// own value codec is expected to interpret these bytes (a Rows/Void/
/// SetKeyspace/SchemaChange/Prepared result body, per the native protocol).
#[derive(Debug, Clone)]
pub struct Response {
    pub body: Vec<u8>,
}

impl From<Frame> for Response {
    fn from(f: Frame) -> Self {
        Self { body: f.body }
    }
}

struct SessionInner {
    hosts: Arc<HostMap>,
    controller: Arc<Controller>,
    dispatcher: RequestDispatcher,
    closed: AtomicBool,
}

/// A live connection to a CQL cluster. Cheaply cloned (it is an `Arc`
/// handle); every clone shares the same connection pools, prepared-query
/// cache, and background topology controller.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl Session {
    /// Connects to the cluster named by `config.contacts`, without an
    /// application event handler.
    pub async fn connect(config: ClusterConfig) -> Result<Self> {
        Self::connect_with_handler(config, None).await
    }

    /// Connects to the cluster, additionally routing every connection/pool/
    /// topology event through `handler` (spec.md §4.9/§4.1's event hooks).
    pub async fn connect_with_handler(config: ClusterConfig, handler: Option<Arc<dyn EventHandler>>) -> Result<Self> {
        config.validate()?;

        let emitter = crate::event::EventEmitter::new(handler);
        let policy = config.policy_factory.build();
        let hosts = Arc::new(HostMap::new());
        let jobs = Arc::new(JobsRegistry::new());
        let prepared = Arc::new(PreparedCache::new());

        let controller = Controller::init(&config, policy.clone(), hosts.clone(), jobs.clone(), prepared.clone(), emitter.clone()).await?;

        let dispatch_controller = controller.clone();
        let dispatcher = RequestDispatcher::new(
            policy,
            hosts.clone(),
            prepared,
            RetryPolicy::new(config.retry.clone()),
            config.protocol_version,
            config.connection.clone(),
            config.pool,
            config.prepare_strategy,
            emitter,
            move |addr| {
                let controller = dispatch_controller.clone();
                tokio::spawn(async move { controller.on_request_path_error(addr).await });
            },
        );

        Ok(Self(Arc::new(SessionInner { hosts, controller, dispatcher, closed: AtomicBool::new(false) })))
    }

    fn check_open(&self) -> Result<()> {
        if self.0.closed.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ErrorKind::SessionClosed.into());
        }
        Ok(())
    }

    /// Runs a caller-built [`Request`] through the full request path:
    /// host selection, retries, and consistency/timeout adjustment on
    /// retry (spec.md §4.10).
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.check_open()?;
        self.0.dispatcher.request(request).await.map(Response::from)
    }

    /// Runs a prepared query: looks up (or lazily/eagerly prepares, per
    /// `ClusterConfig::with_prepare_strategy`) the cached QueryId for
    /// `query_text`, then EXECUTEs it, transparently re-preparing once on
    /// an Unprepared response (spec.md §4.10's prepared-query path).
    /// `encode_execute` receives the QueryId bytes and the (possibly
    /// downgraded) consistency and must return the full EXECUTE body,
    /// since bound-value encoding is out of this crate's scope.
    pub async fn execute_prepared(
        &self,
        query_text: &str,
        consistency: Consistency,
        encode_execute: impl Fn(&[u8], Consistency) -> Vec<u8> + Send + Sync + 'static,
    ) -> Result<Response> {
        self.check_open()?;
        self.0
            .dispatcher
            .execute_prepared(query_text, consistency, Arc::new(encode_execute))
            .await
            .map(Response::from)
    }

    /// The cluster's currently known hosts (up and down), per the last
    /// discovery/refresh cycle.
    pub fn known_hosts(&self) -> Vec<Host> {
        self.0.hosts.all_hosts()
    }

    /// Disconnects the control connection, cancels every background job,
    /// and drains every connection pool (spec.md §8: "after shutdown, no
    /// background job remains live and all pools are drained"). Further
    /// calls to [`Session::execute`] or [`Session::execute_prepared`] fail
    /// with [`ErrorKind::SessionClosed`].
    pub async fn shutdown(self) {
        self.0.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.0.controller.shutdown().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn response_passes_frame_body_through_unparsed() {
        let frame = crate::conn::wire::Frame::request(
            crate::types::ProtocolVersion::V4,
            crate::conn::wire::FrameFlags::empty(),
            0,
            crate::conn::wire::Opcode::Result,
            vec![1, 2, 3],
        );
        let response = Response::from(frame);
        assert_eq!(response.body, vec![1, 2, 3]);
    }
}
