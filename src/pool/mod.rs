//! Per-host bounded connection pool (spec.md §4.4): a thin `Clone`-able
//! handle fronting a request channel into a dedicated actor task
//! ([`worker::PoolWorker`]) that owns the actual connection list.

mod worker;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::{
    config::{ConnectionSettings, PoolSettings},
    conn::Connection,
    error::{Error, ErrorKind, Result},
    event::EventEmitter,
    types::{InetAddr, ProtocolVersion},
};

enum Request {
    CheckOut { reply: oneshot::Sender<Result<Connection>> },
    CheckIn { conn: Connection },
    Destroy { reply: oneshot::Sender<()> },
}

/// A `Clone`-able handle to a per-host connection pool. The pool itself
/// lives in a dedicated task; every operation here is a message send plus
/// an awaited reply.
#[derive(Clone)]
pub struct ConnectionPool {
    addr: InetAddr,
    wait_queue_timeout: Duration,
    sender: mpsc::UnboundedSender<Request>,
}

impl ConnectionPool {
    /// Spawns the pool's worker task and returns a handle to it.
    pub(crate) fn create(
        addr: InetAddr,
        version: ProtocolVersion,
        conn_settings: ConnectionSettings,
        pool_settings: PoolSettings,
        emitter: EventEmitter,
    ) -> Self {
        let wait_queue_timeout = pool_settings.wait_queue_timeout;
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(worker::PoolWorker::new(addr, version, conn_settings, pool_settings, emitter, receiver).run());
        Self { addr, wait_queue_timeout, sender }
    }

    pub(crate) fn addr(&self) -> InetAddr {
        self.addr
    }

    /// Acquire a connection, blocking up to `waitQueueTimeout`; on timeout
    /// fails with `HostsBusy` (spec.md §4.4).
    async fn check_out(&self) -> Result<Connection> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(Request::CheckOut { reply: reply_tx })
            .map_err(|_| Error::connection_closed(self.addr))?;
        match tokio::time::timeout(self.wait_queue_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::connection_closed(self.addr)),
            Err(_) => Err(ErrorKind::HostsBusy.into()),
        }
    }

    fn check_in(&self, conn: Connection) {
        let _ = self.sender.send(Request::CheckIn { conn });
    }

    /// Scoped acquisition: acquire a connection, run `action`, then release
    /// it — closing it first if `action` raised (spec.md §4.4's `with`).
    pub(crate) async fn with<F, Fut, T>(&self, action: F) -> Result<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let conn = self.check_out().await?;
        match action(conn.clone()).await {
            Ok(value) => {
                self.check_in(conn);
                Ok(value)
            }
            Err(e) => {
                conn.close(crate::event::ConnectionClosedReason::Error).await;
                // Still notify the worker so it drops `open_count` for this
                // slot; `check_in` treats a closed connection as "discard",
                // which is idempotent with the `close` above.
                self.check_in(conn);
                Err(e)
            }
        }
    }

    pub(crate) async fn destroy(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.sender.send(Request::Destroy { reply: reply_tx }).is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Opens a short-lived, throwaway connection to `addr` with a 5s
    /// connect timeout and immediately closes it, per spec.md §4.8's
    /// monitor probe and §4.4's `ping` helper.
    pub(crate) async fn ping(
        addr: InetAddr,
        version: ProtocolVersion,
        mut settings: ConnectionSettings,
        emitter: EventEmitter,
    ) -> Result<()> {
        settings.connect_timeout = Duration::from_secs(5);
        let conn = Connection::connect(addr, version, settings, emitter).await?;
        conn.close(crate::event::ConnectionClosedReason::Requested).await;
        Ok(())
    }
}
