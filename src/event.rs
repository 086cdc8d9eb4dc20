//! The multi-subscriber event broadcaster ("signal") and the optional
//! application-facing event handler: an append-only list of subscribers
//! under a short lock, invoked synchronously by the emitter. Subscribers
//! must not block.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::types::InetAddr;

/// A multi-subscriber broadcaster. `subscribe` returns a receiver fed every
/// subsequent `emit`; subscribers that stop polling are pruned lazily on the
/// next emit.
pub(crate) struct Signal<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Signal<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Invoked synchronously by the emitter (e.g. the connection's reader
    /// task on every event frame). Never blocks: `UnboundedSender::send`
    /// only fails if the receiver was dropped, which we treat as "prune".
    pub(crate) fn emit(&self, value: T) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(value.clone()).is_ok());
    }
}

/// Events describing a single connection's lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Created { addr: InetAddr, conn_id: u64 },
    Ready { addr: InetAddr, conn_id: u64 },
    Closed { addr: InetAddr, conn_id: u64, reason: ConnectionClosedReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionClosedReason {
    Requested,
    Error,
    Idle,
    PoolClosed,
}

/// Events describing the per-host connection pool.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Created { addr: InetAddr },
    Closed { addr: InetAddr },
    CheckoutFailed { addr: InetAddr },
}

/// Events describing cluster-wide topology changes, the client-visible
/// projection of [`crate::types::Host`] membership changes (spec.md's
/// `HostEvent`, re-exposed for application observability).
#[derive(Debug, Clone)]
pub enum TopologyEvent {
    HostUp(InetAddr),
    HostDown(InetAddr),
    HostAdded(InetAddr),
    HostRemoved(InetAddr),
}

/// An application-supplied sink for [`ConnectionEvent`]/[`PoolEvent`]/
/// [`TopologyEvent`]. Optional: a driver that only cares about `tracing`
/// output need not implement this. Handlers must not block; they are
/// invoked synchronously from inside the emitting task.
pub trait EventHandler: Send + Sync {
    fn handle_connection_event(&self, _event: ConnectionEvent) {}
    fn handle_pool_event(&self, _event: PoolEvent) {}
    fn handle_topology_event(&self, _event: TopologyEvent) {}
}

/// Fans a single logical event out to both `tracing` (if the
/// `tracing-unstable` feature is enabled) and an optional application
/// handler.
#[derive(Clone)]
pub(crate) struct EventEmitter {
    handler: Option<Arc<dyn EventHandler>>,
}

impl EventEmitter {
    pub(crate) fn new(handler: Option<Arc<dyn EventHandler>>) -> Self {
        Self { handler }
    }

    pub(crate) fn emit_connection(&self, event: ConnectionEvent) {
        #[cfg(feature = "tracing-unstable")]
        tracing::debug!(?event, "connection event");
        if let Some(h) = &self.handler {
            h.handle_connection_event(event);
        }
    }

    pub(crate) fn emit_pool(&self, event: PoolEvent) {
        #[cfg(feature = "tracing-unstable")]
        tracing::debug!(?event, "pool event");
        if let Some(h) = &self.handler {
            h.handle_pool_event(event);
        }
    }

    pub(crate) fn emit_topology(&self, event: TopologyEvent) {
        #[cfg(feature = "tracing-unstable")]
        tracing::info!(?event, "topology event");
        if let Some(h) = &self.handler {
            h.handle_topology_event(event);
        }
    }
}
