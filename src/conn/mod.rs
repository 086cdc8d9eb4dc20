//! The per-connection frame multiplexer (spec.md §4.1): owns one
//! [`stream::Socket`], runs a reader task, multiplexes frames across a
//! bounded set of stream slots, and exposes a synchronous request call plus
//! an event signal. One socket, one handshake, one background reader per
//! connection.

pub(crate) mod handshake;
mod reader;
pub(crate) mod server_event;
pub(crate) mod slot;
pub(crate) mod stream;
pub(crate) mod ticket;
pub(crate) mod wire;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex as AsyncMutex,
    task::JoinHandle,
};

use crate::{
    config::ConnectionSettings,
    error::{Error, ErrorKind, Result},
    event::{ConnectionClosedReason, ConnectionEvent, EventEmitter},
    types::{InetAddr, ProtocolVersion},
};

use self::{
    server_event::ServerEvent,
    slot::SyncSlot,
    stream::Socket,
    ticket::TicketPool,
    wire::{Frame, FrameFlags, Opcode},
};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// A process-unique connection identifier, used for equality and for
/// event/log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

type StreamCell = AsyncMutex<Option<Arc<SyncSlot<Frame>>>>;

struct ConnectionInner {
    id: ConnId,
    addr: InetAddr,
    version: ProtocolVersion,
    settings: ConnectionSettings,
    streams: Vec<StreamCell>,
    tickets: TicketPool,
    write_half: AsyncMutex<Option<WriteHalf<Socket>>>,
    open: AtomicBool,
    events: crate::event::Signal<Arc<ServerEvent>>,
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    emitter: EventEmitter,
    timeouts: crate::timeout::TimeoutManager,
}

/// Cleanup sequence shared by an explicit `close()` and the reader task
/// discovering the socket is dead on its own (spec.md §4.1): atomically
/// swap open→closed, close the ticket pool and every stream slot so no
/// waiter is left stuck forever, then shut down the socket. Skips aborting
/// the reader's own `JoinHandle` when called from inside the reader task
/// itself (`abort_reader` is false in that case — a task cannot usefully
/// abort itself, it simply returns after this call).
async fn cleanup(inner: &Arc<ConnectionInner>, reason: ConnectionClosedReason, abort_reader: bool) {
    if inner.open.swap(false, Ordering::SeqCst) {
        if abort_reader {
            if let Some(handle) = inner.reader_handle.lock().unwrap().take() {
                handle.abort();
            }
        }

        inner.tickets.close(Error::connection_closed(inner.addr)).await;

        for cell in &inner.streams {
            if let Some(slot) = cell.lock().await.take() {
                slot.close(Error::connection_closed(inner.addr));
            }
        }

        let write_half = inner.write_half.lock().await.take();
        tokio::spawn(async move {
            if let Some(mut w) = write_half {
                let _ = w.shutdown().await;
            }
        });

        inner.emitter.emit_connection(ConnectionEvent::Closed {
            addr: inner.addr,
            conn_id: inner.id.0,
            reason,
        });
    }
}

/// Owns one socket; runs a reader task; multiplexes frames across N stream
/// slots; exposes a synchronous request call and an event signal.
#[derive(Clone)]
pub struct Connection(Arc<ConnectionInner>);

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Connection {}

impl Connection {
    /// Opens a socket, performs STARTUP (optionally authenticating and
    /// selecting a default keyspace), validates compression support, and
    /// spawns the reader task. On any failure after the socket opens, the
    /// connection is closed before the error is returned.
    pub(crate) async fn connect(
        addr: InetAddr,
        version: ProtocolVersion,
        settings: ConnectionSettings,
        emitter: EventEmitter,
    ) -> Result<Self> {
        #[cfg(feature = "rustls-tls")]
        let tls = settings.tls.clone();
        #[cfg(not(feature = "rustls-tls"))]
        let tls = None;

        let mut socket = Socket::connect(addr.socket_addr(), Some(settings.connect_timeout), tls).await?;

        let outcome = match handshake::handshake(version, &settings, &mut socket).await {
            Ok(o) => o,
            Err(e) => {
                socket.shutdown().await.ok();
                return Err(e);
            }
        };

        if settings.authenticator.is_some() && !outcome.authenticated {
            #[cfg(feature = "tracing-unstable")]
            tracing::warn!(%addr, "authenticator configured but server did not require authentication");
        }

        let (read_half, write_half) = tokio::io::split(socket);

        let id = ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
        let max_streams = settings.max_streams as usize;
        let mut streams = Vec::with_capacity(max_streams);
        streams.resize_with(max_streams, || AsyncMutex::new(None));

        let inner = Arc::new(ConnectionInner {
            id,
            addr,
            version,
            settings,
            streams,
            tickets: TicketPool::new(max_streams as u16),
            write_half: AsyncMutex::new(Some(write_half)),
            open: AtomicBool::new(true),
            events: crate::event::Signal::new(),
            reader_handle: std::sync::Mutex::new(None),
            emitter,
            timeouts: crate::timeout::TimeoutManager::new(),
        });

        let reader_inner = inner.clone();
        let handle = tokio::spawn(async move {
            reader::run(reader_inner, read_half).await;
        });
        *inner.reader_handle.lock().unwrap() = Some(handle);

        inner.emitter.emit_connection(ConnectionEvent::Ready {
            addr: inner.addr,
            conn_id: inner.id.0,
        });

        Ok(Self(inner))
    }

    pub(crate) fn id(&self) -> ConnId {
        self.0.id
    }

    pub(crate) fn addr(&self) -> InetAddr {
        self.0.addr
    }

    pub(crate) fn is_open(&self) -> bool {
        self.0.open.load(Ordering::SeqCst)
    }

    /// Serializes `req` with a fresh stream id, sends it under
    /// `send_timeout`, awaits a matching response under
    /// `response_timeout`, and returns the raw response frame. Timeouts are
    /// passed per call (rather than read from the connection's own
    /// settings) because the retry engine shifts them on later attempts
    /// (spec.md §4.10 step 3) without reconnecting.
    pub(crate) async fn request(
        &self,
        opcode: Opcode,
        body: Vec<u8>,
        send_timeout: std::time::Duration,
        response_timeout: std::time::Duration,
    ) -> Result<Frame> {
        let inner = &self.0;
        if !inner.open.load(Ordering::SeqCst) {
            return Err(Error::connection_closed(inner.addr));
        }

        let id = inner.tickets.get().await?;
        let slot = Arc::new(SyncSlot::create());
        *inner.streams[id as usize].lock().await = Some(slot.clone());

        let frame = Frame::request(inner.version, FrameFlags::empty(), id as i16, opcode, body);

        let addr = inner.addr;
        let send_result = inner
            .timeouts
            .apply(send_timeout, self.write_frame(&frame), move || ErrorKind::ConnectTimeout(addr).into())
            .await;
        if let Err(e) = send_result {
            self.close(ConnectionClosedReason::Error).await;
            return Err(e);
        }

        // Response timeout is delivered as an asynchronous alarm (spec.md
        // §4.1: "an asynchronous notification is raised on the caller")
        // rather than a future racing `slot.get()` inline, so a slow-to-poll
        // caller still gets the slot killed on schedule. If `get()` wins
        // the race, the alarm is cancelled before it can fire.
        let kill_slot = slot.clone();
        let alarm = inner
            .timeouts
            .fire_after(response_timeout, async move { kill_slot.kill(ErrorKind::ResponseTimeout(addr).into()) });

        match slot.get().await {
            Ok(response) => {
                alarm.cancel();
                *inner.streams[id as usize].lock().await = None;
                inner.tickets.mark_available(id).await;
                Ok(response)
            }
            Err(e) => {
                // Either the alarm above killed the slot (response
                // timeout — deliberately do NOT return the id to the
                // ticket pool yet; the reader task reclaims it once it
                // discovers the stale response can't be delivered, per
                // spec.md's "deposit fails" path) or the slot was closed
                // out from under us by a connection shutdown (ticket pool
                // already closed too, nothing to reclaim).
                Err(e)
            }
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        let mut guard = self.0.write_half.lock().await;
        match guard.as_mut() {
            Some(w) => frame.write_to(w).await,
            None => Err(Error::connection_closed(self.0.addr)),
        }
    }

    /// Issues a REGISTER for `event_types` and returns a receiver fed every
    /// subsequent server event. Duplicate subscriptions are allowed.
    pub(crate) async fn register(&self, event_types: &[&str]) -> Result<tokio::sync::mpsc::UnboundedReceiver<Arc<ServerEvent>>> {
        let mut body = (event_types.len() as u16).to_be_bytes().to_vec();
        for ty in event_types {
            body.extend_from_slice(&(ty.len() as u16).to_be_bytes());
            body.extend_from_slice(ty.as_bytes());
        }
        let reply = self
            .request(Opcode::Register, body, self.0.settings.send_timeout, self.0.settings.response_timeout)
            .await?;
        if reply.opcode != Opcode::Ready {
            return Err(ErrorKind::ParseError("unexpected reply to REGISTER".into()).into());
        }
        Ok(self.0.events.subscribe())
    }

    /// Cancels the reader task; the cleanup sequence runs exactly once,
    /// guarded by the atomic open→closed swap (spec.md §4.1).
    pub(crate) async fn close(&self, reason: ConnectionClosedReason) {
        cleanup(&self.0, reason, true).await;
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
