//! The pool's actor task: owns the idle-connection queue and the
//! outstanding-connection count exclusively, reached only through
//! [`super::Request`] messages. Runs a `tokio::select!` loop over
//! incoming requests and a periodic maintenance tick that evicts
//! idle connections past their timeout.

use std::{collections::VecDeque, time::Instant};

use tokio::sync::mpsc;

use crate::{
    config::{ConnectionSettings, PoolSettings},
    conn::Connection,
    error::Result,
    event::{ConnectionClosedReason, EventEmitter, PoolEvent},
    types::{InetAddr, ProtocolVersion},
};

use super::Request;

struct Idle {
    conn: Connection,
    since: Instant,
}

pub(super) struct PoolWorker {
    addr: InetAddr,
    version: ProtocolVersion,
    conn_settings: ConnectionSettings,
    pool_settings: PoolSettings,
    emitter: EventEmitter,
    receiver: mpsc::UnboundedReceiver<Request>,
    idle: VecDeque<Idle>,
    open_count: u32,
    waiters: VecDeque<tokio::sync::oneshot::Sender<Result<Connection>>>,
    closed: bool,
}

impl PoolWorker {
    pub(super) fn new(
        addr: InetAddr,
        version: ProtocolVersion,
        conn_settings: ConnectionSettings,
        pool_settings: PoolSettings,
        emitter: EventEmitter,
        receiver: mpsc::UnboundedReceiver<Request>,
    ) -> Self {
        emitter.emit_pool(PoolEvent::Created { addr });
        Self {
            addr,
            version,
            conn_settings,
            pool_settings,
            emitter,
            receiver,
            idle: VecDeque::new(),
            open_count: 0,
            waiters: VecDeque::new(),
            closed: false,
        }
    }

    pub(super) async fn run(mut self) {
        let mut maintenance = tokio::time::interval(std::time::Duration::from_secs(30));
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                maybe_req = self.receiver.recv() => {
                    match maybe_req {
                        Some(req) => self.handle(req).await,
                        None => break,
                    }
                }

                _ = maintenance.tick() => {
                    self.evict_idle_past_timeout().await;
                }
            }

            if self.closed {
                break;
            }
        }

        for idle in self.idle.drain(..) {
            idle.conn.close(ConnectionClosedReason::PoolClosed).await;
        }
        self.emitter.emit_pool(PoolEvent::Closed { addr: self.addr });
    }

    async fn handle(&mut self, req: Request) {
        match req {
            Request::CheckOut { reply } => self.check_out(reply).await,
            Request::CheckIn { conn } => self.check_in(conn),
            Request::Destroy { reply } => {
                self.closed = true;
                let _ = reply.send(());
            }
        }
    }

    async fn check_out(&mut self, reply: tokio::sync::oneshot::Sender<Result<Connection>>) {
        if let Some(idle) = self.idle.pop_front() {
            let _ = reply.send(Ok(idle.conn));
            return;
        }

        if self.open_count < self.pool_settings.max_connections {
            self.open_count += 1;
            match Connection::connect(self.addr, self.version, self.conn_settings.clone(), self.emitter.clone()).await
            {
                Ok(conn) => {
                    let _ = reply.send(Ok(conn));
                }
                Err(e) => {
                    self.open_count -= 1;
                    self.emitter.emit_pool(PoolEvent::CheckoutFailed { addr: self.addr });
                    let _ = reply.send(Err(e));
                }
            }
            return;
        }

        // Pool is at capacity with nothing idle: queue the waiter and hand
        // it a connection the moment one is checked back in. The caller
        // races this reply against `waitQueueTimeout` itself (see
        // `ConnectionPool::check_out`); if it gives up, this sender is
        // simply dropped later with no receiver listening, which is a
        // harmless no-op send.
        self.waiters.push_back(reply);
    }

    fn check_in(&mut self, conn: Connection) {
        if self.closed || !conn.is_open() {
            if self.open_count > 0 {
                self.open_count -= 1;
            }
            tokio::spawn(async move { conn.close(ConnectionClosedReason::Requested).await });
            return;
        }

        if let Some(reply) = self.waiters.pop_front() {
            let _ = reply.send(Ok(conn));
            return;
        }

        self.idle.push_back(Idle { conn, since: Instant::now() });
    }

    async fn evict_idle_past_timeout(&mut self) {
        let Some(idle_timeout) = self.pool_settings.idle_timeout else {
            return;
        };
        let now = Instant::now();
        let mut keep = VecDeque::with_capacity(self.idle.len());
        while let Some(entry) = self.idle.pop_front() {
            if now.duration_since(entry.since) >= idle_timeout {
                self.open_count = self.open_count.saturating_sub(1);
                entry.conn.close(ConnectionClosedReason::Idle).await;
            } else {
                keep.push_back(entry);
            }
        }
        self.idle = keep;
    }
}
