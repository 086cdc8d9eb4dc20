//! Cluster controller (spec.md §4.9): owns the control connection,
//! discovers peers via `system.local`/`system.peers`, subscribes to the
//! control connection's push events, reacts to topology/status changes,
//! and recovers the control connection on failure. One background-driven
//! view of cluster membership, mutated under a short-lived lock and kept
//! current by both server-pushed TOPOLOGY_CHANGE / STATUS_CHANGE /
//! SCHEMA_CHANGE events and a periodic independent peer refresh.

use std::{net::IpAddr, sync::Arc, time::Duration};

use tokio::sync::Mutex as AsyncMutex;

use crate::{
    config::{ClusterConfig, ConnectionSettings},
    conn::{
        server_event::{ServerEvent, StatusChangeKind, TopologyChangeKind},
        wire::{self, Opcode},
        Connection,
    },
    error::{Error, ErrorKind, Result},
    event::{ConnectionClosedReason, EventEmitter, TopologyEvent},
    jobs::JobsRegistry,
    monitor,
    policy::LoadBalancingPolicy,
    pool::ConnectionPool,
    prepare::PreparedCache,
    rows,
    topology::HostMap,
    types::{Consistency, Host, HostEvent, InetAddr, ProtocolVersion},
};

const EVENT_TYPES: [&str; 3] = ["TOPOLOGY_CHANGE", "STATUS_CHANGE", "SCHEMA_CHANGE"];
const RECONNECT_BACKOFF_BASE: Duration = Duration::from_millis(5);
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(5);
const MONITOR_UPPER_BOUND: Duration = Duration::from_secs(60);
pub(crate) const PEER_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

enum ControlState {
    Disconnected,
    Connected { conn: Connection, addr: InetAddr },
    Reconnecting,
}

/// Owns exactly one [`Connection`] used for topology queries and event
/// subscription, and the background jobs that keep the [`HostMap`] and
/// [`LoadBalancingPolicy`] current.
pub(crate) struct Controller {
    port: u16,
    version: ProtocolVersion,
    conn_settings: ConnectionSettings,
    policy: Arc<dyn LoadBalancingPolicy>,
    hosts: Arc<HostMap>,
    jobs: Arc<JobsRegistry>,
    prepared: Arc<PreparedCache>,
    emitter: EventEmitter,
    state: AsyncMutex<ControlState>,
}

impl Controller {
    /// Tries each contact address in order; the first that accepts a
    /// connection and completes bootstrap discovery becomes the control
    /// connection (spec.md §4.9, scenario 2). When every contact is
    /// unreachable, fails deterministically — every intermediate socket
    /// opened along the way has already been closed by `Connection::connect`
    /// on its own failure path.
    pub(crate) async fn init(
        config: &ClusterConfig,
        policy: Arc<dyn LoadBalancingPolicy>,
        hosts: Arc<HostMap>,
        jobs: Arc<JobsRegistry>,
        prepared: Arc<PreparedCache>,
        emitter: EventEmitter,
    ) -> Result<Arc<Self>> {
        let controller = Arc::new(Self {
            port: config.port,
            version: config.protocol_version,
            conn_settings: config.connection.clone(),
            policy,
            hosts,
            jobs,
            prepared,
            emitter,
            state: AsyncMutex::new(ControlState::Disconnected),
        });

        let mut last_err = None;
        for contact in &config.contacts {
            let addrs = match resolve(contact, controller.port).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            for addr in addrs {
                match Connection::connect(addr, controller.version, controller.conn_settings.clone(), controller.emitter.clone()).await {
                    Ok(conn) => match controller.bootstrap(conn, addr, true).await {
                        Ok(()) => {
                            controller.schedule_peer_refresh(addr);
                            return Ok(controller);
                        }
                        Err(e) => last_err = Some(e),
                    },
                    Err(e) => last_err = Some(e),
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ErrorKind::NoHostAvailable.into()))
    }

    /// Runs discovery against a freshly connected control candidate,
    /// subscribes it to push events, spawns the event-dispatch loop, and
    /// brings up every newly discovered host. `initial` distinguishes the
    /// one-time `policy.setup` call (spec.md §4.5: "called once, at
    /// controller start") from a later `replaceControl` re-bootstrap, which
    /// instead folds newly seen hosts in via individual `on_event` calls.
    async fn bootstrap(self: &Arc<Self>, conn: Connection, addr: InetAddr, initial: bool) -> Result<()> {
        let discovered = self.discover_peers(&conn, addr).await?;

        if initial {
            let mut accepted = Vec::new();
            for host in &discovered {
                if self.policy.acceptable(host) {
                    accepted.push(host.clone());
                }
            }
            self.policy.setup(&accepted);
            for host in accepted {
                self.bring_up(host).await;
            }
        } else {
            for host in discovered {
                if self.hosts.contains(host.addr) {
                    continue;
                }
                if self.policy.acceptable(&host) {
                    self.policy.on_event(&HostEvent::New(host.clone()));
                    self.bring_up(host).await;
                }
            }
        }

        let events = conn.register(&EVENT_TYPES).await?;
        *self.state.lock().await = ControlState::Connected { conn, addr };
        spawn_event_loop(self.clone(), events);
        Ok(())
    }

    /// Inserts a newly accepted host, pings it, and either marks it up with
    /// a pool or marks it down with a pool *and* a scheduled monitor job
    /// (spec.md §4.9's per-discovered-host bring-up sequence).
    async fn bring_up(self: &Arc<Self>, host: Host) {
        let addr = host.addr;
        self.hosts.insert(host, false);
        let pool = ConnectionPool::create(addr, self.version, self.conn_settings.clone(), crate::config::PoolSettings::default(), self.emitter.clone());
        let _ = self.hosts.pool_or_create(addr, || pool);

        match ConnectionPool::ping(addr, self.version, self.conn_settings.clone(), self.emitter.clone()).await {
            Ok(()) => {
                self.hosts.mark_up(addr);
                self.emitter.emit_topology(TopologyEvent::HostUp(addr));
            }
            Err(_) => {
                self.hosts.mark_down(addr);
                self.schedule_monitor(addr);
            }
        }
    }

    fn schedule_monitor(self: &Arc<Self>, addr: InetAddr) {
        let version = self.version;
        let settings = self.conn_settings.clone();
        let emitter = self.emitter.clone();
        let policy = self.policy.clone();
        let hosts = self.hosts.clone();
        let handle = tokio::spawn(async move {
            monitor::run(addr, version, settings, emitter.clone(), Duration::ZERO, MONITOR_UPPER_BOUND).await;
            hosts.mark_up(addr);
            policy.on_event(&HostEvent::Up(addr));
            emitter.emit_topology(TopologyEvent::HostUp(addr));
        });
        self.jobs.add(addr, true, handle);
    }

    /// Registers the periodic independent peer-refresh job against the
    /// control host's own address (SPEC_FULL.md's supplemented "periodic
    /// peer re-discovery" feature). Deliberately shares the jobs registry
    /// key space with per-host monitors: if the control host itself ever
    /// goes down, its monitor job (`replace = true`) supersedes this one,
    /// which is correct — a down control connection has no event channel
    /// to refresh from anyway, and reconnection re-schedules a fresh
    /// refresh job once a new control host is bootstrapped.
    fn schedule_peer_refresh(self: &Arc<Self>, key: InetAddr) {
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PEER_REFRESH_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                controller.refresh_peers().await;
            }
        });
        self.jobs.add(key, false, handle);
    }

    /// Queries `system.local` (the contact node's own dc/rack) and
    /// `system.peers` (every other known member), producing one [`Host`]
    /// per row. `rpc_address` is preferred over `peer` when it is set and
    /// not the "unset" `0.0.0.0` sentinel, matching real driver behavior
    /// for nodes configured with a separate broadcast/rpc address.
    async fn discover_peers(&self, conn: &Connection, local_addr: InetAddr) -> Result<Vec<Host>> {
        let mut hosts = Vec::new();

        let local_body = wire::encode_query("SELECT data_center, rack FROM system.local", Consistency::One);
        let local_frame = conn
            .request(Opcode::Query, local_body, self.conn_settings.send_timeout, self.conn_settings.response_timeout)
            .await?;
        let local_rows = rows::decode_rows(&local_frame)?;
        if let Some(row) = local_rows.into_iter().next() {
            let dc = rows::column_as_string(&row[0])?;
            let rack = rows::column_as_string(&row[1])?;
            hosts.push(Host::new(local_addr, dc, rack));
        }

        let peers_body = wire::encode_query("SELECT peer, rpc_address, data_center, rack FROM system.peers", Consistency::One);
        let peers_frame = conn
            .request(Opcode::Query, peers_body, self.conn_settings.send_timeout, self.conn_settings.response_timeout)
            .await?;
        for row in rows::decode_rows(&peers_frame)? {
            let peer_addr = rows::column_as_inet(&row[0], self.port)?;
            let rpc_addr = rows::column_as_inet(&row[1], self.port).ok();
            let addr = match rpc_addr {
                Some(a) if !is_unspecified(a) => a,
                _ => peer_addr,
            };
            let dc = rows::column_as_string(&row[2])?;
            let rack = rows::column_as_string(&row[3])?;
            hosts.push(Host::new(addr, dc, rack));
        }

        Ok(hosts)
    }

    /// Dispatches one decoded server event to the appropriate reaction,
    /// per the mapping in spec.md §4.9.
    async fn handle_event(self: &Arc<Self>, event: Arc<ServerEvent>) {
        match &*event {
            ServerEvent::StatusChange(StatusChangeKind::Down, addr) => {
                self.policy.on_event(&HostEvent::Down(*addr));
                self.hosts.mark_down(*addr);
                self.emitter.emit_topology(TopologyEvent::HostDown(*addr));
                self.schedule_monitor(*addr);
            }
            ServerEvent::StatusChange(StatusChangeKind::Up, addr) => {
                if self.hosts.contains(*addr) {
                    self.hosts.mark_up(*addr);
                    self.policy.on_event(&HostEvent::Up(*addr));
                    self.emitter.emit_topology(TopologyEvent::HostUp(*addr));
                    self.schedule_monitor(*addr);
                    self.prepare_all_on(*addr).await;
                }
            }
            ServerEvent::TopologyChange(TopologyChangeKind::NewNode, addr) => {
                self.rediscover_and_fold_in(*addr).await;
            }
            ServerEvent::TopologyChange(TopologyChangeKind::RemovedNode, addr) => {
                self.hosts.remove(*addr);
                self.jobs.remove(*addr);
                self.policy.on_event(&HostEvent::Gone(*addr));
                self.emitter.emit_topology(TopologyEvent::HostRemoved(*addr));
            }
            ServerEvent::SchemaChange => {}
        }
    }

    /// Re-runs peer discovery against the current control connection and,
    /// if `addr` is among the results, folds it in as a new host (spec.md
    /// §4.9's `NewNode` handling).
    async fn rediscover_and_fold_in(self: &Arc<Self>, addr: InetAddr) {
        let (conn, control_addr) = match &*self.state.lock().await {
            ControlState::Connected { conn, addr } => (conn.clone(), *addr),
            _ => return,
        };
        let Ok(discovered) = self.discover_peers(&conn, control_addr).await else {
            return;
        };
        if let Some(host) = discovered.into_iter().find(|h| h.addr == addr) {
            if !self.hosts.contains(host.addr) && self.policy.acceptable(&host) {
                self.policy.on_event(&HostEvent::New(host.clone()));
                self.emitter.emit_topology(TopologyEvent::HostAdded(host.addr));
                self.bring_up(host).await;
                self.prepare_all_on(addr).await;
            }
        }
    }

    /// Re-runs peer discovery unconditionally, folding in any host not yet
    /// known. Spawned by the caller (the session's background jobs) every
    /// [`PEER_REFRESH_INTERVAL`] as an independent safety net alongside the
    /// push-event-driven discovery above (SPEC_FULL.md's supplemented
    /// "periodic peer re-discovery" feature).
    pub(crate) async fn refresh_peers(self: &Arc<Self>) {
        let (conn, control_addr) = match &*self.state.lock().await {
            ControlState::Connected { conn, addr } => (conn.clone(), *addr),
            _ => return,
        };
        let Ok(discovered) = self.discover_peers(&conn, control_addr).await else {
            return;
        };
        for host in discovered {
            if self.hosts.contains(host.addr) {
                continue;
            }
            if self.policy.acceptable(&host) {
                self.policy.on_event(&HostEvent::New(host.clone()));
                self.emitter.emit_topology(TopologyEvent::HostAdded(host.addr));
                self.bring_up(host).await;
            }
        }
    }

    /// Re-PREPAREs every currently cached query against `addr` (spec.md
    /// §4.9's `prepareAll`), using a short-lived connection since this
    /// runs off the request dispatcher's pool lifecycle entirely.
    async fn prepare_all_on(&self, addr: InetAddr) {
        let queries = self.prepared.all_queries();
        if queries.is_empty() {
            return;
        }
        let Ok(conn) = Connection::connect(addr, self.version, self.conn_settings.clone(), self.emitter.clone()).await else {
            return;
        };
        for query in queries {
            let mut body = Vec::with_capacity(4 + query.len());
            body.extend_from_slice(&(query.len() as u32).to_be_bytes());
            body.extend_from_slice(query.as_bytes());
            let _ = conn.request(Opcode::Prepare, body, self.conn_settings.send_timeout, self.conn_settings.response_timeout).await;
        }
        conn.close(ConnectionClosedReason::Requested).await;
    }

    /// Called by the request dispatcher on every connection-level error
    /// (spec.md §4.9: "triggered by a request-path connection error
    /// against the current control address"). A no-op unless `addr` is
    /// the live control connection's address.
    pub(crate) async fn on_request_path_error(self: &Arc<Self>, addr: InetAddr) {
        let is_control = matches!(&*self.state.lock().await, ControlState::Connected { addr: a, .. } if *a == addr);
        if !is_control {
            return;
        }
        self.begin_reconnect().await;
    }

    async fn begin_reconnect(self: &Arc<Self>) {
        let old = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, ControlState::Reconnecting)
        };
        if let ControlState::Connected { conn, addr } = old {
            conn.close(ConnectionClosedReason::Error).await;
            self.hosts.mark_down(addr);
            self.policy.on_event(&HostEvent::Down(addr));
            self.emitter.emit_topology(TopologyEvent::HostDown(addr));
        }

        let candidates = self.hosts.all_hosts();
        let mut attempt = 0u32;
        for host in &candidates {
            if let Ok(conn) = Connection::connect(host.addr, self.version, self.conn_settings.clone(), self.emitter.clone()).await {
                if self.bootstrap(conn, host.addr, false).await.is_ok() {
                    #[cfg(feature = "tracing-unstable")]
                    tracing::info!(addr = %host.addr, "control connection re-established");
                    return;
                }
            }
            attempt += 1;
            let backoff = RECONNECT_BACKOFF_BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX)).min(RECONNECT_BACKOFF_CAP);
            tokio::time::sleep(backoff).await;
        }

        *self.state.lock().await = ControlState::Disconnected;
        #[cfg(feature = "tracing-unstable")]
        tracing::error!("no host reachable while recovering the control connection");
    }

    /// Destroys background jobs, the control connection, and every per-host
    /// pool (spec.md §4.9 `shutdown`).
    pub(crate) async fn shutdown(&self) {
        self.jobs.destroy();
        if let ControlState::Connected { conn, .. } = std::mem::replace(&mut *self.state.lock().await, ControlState::Disconnected) {
            conn.close(ConnectionClosedReason::Requested).await;
        }
        for pool in self.hosts.all_pools() {
            pool.destroy().await;
        }
    }
}

fn is_unspecified(addr: InetAddr) -> bool {
    matches!(addr.socket_addr().ip(), IpAddr::V4(v4) if v4.is_unspecified())
}

/// Spawns the background task that drains the control connection's event
/// receiver and dispatches each event to `controller`. Split out from
/// `bootstrap` so the latter can call it the moment the connection is
/// registered, before releasing the state lock.
fn spawn_event_loop(controller: Arc<Controller>, mut frames: tokio::sync::mpsc::UnboundedReceiver<Arc<ServerEvent>>) {
    tokio::spawn(async move {
        while let Some(event) = frames.recv().await {
            controller.handle_event(event).await;
        }
    });
}

async fn resolve(contact: &str, port: u16) -> Result<Vec<InetAddr>> {
    use tokio::net::lookup_host;
    let addrs: Vec<InetAddr> = lookup_host((contact, port))
        .await
        .map_err(|_| -> Error { ErrorKind::NoDnsResults(contact.to_string()).into() })?
        .map(InetAddr::from)
        .collect();
    if addrs.is_empty() {
        return Err(ErrorKind::NoDnsResults(contact.to_string()).into());
    }
    Ok(addrs)
}
