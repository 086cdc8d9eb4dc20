//! The background task that owns the read half of a connection's socket:
//! one frame at a time, dispatched either to a waiting stream slot or, for
//! stream id -1, to the connection's event signal. A dedicated task owns
//! this mutable state, reached only through channels/slots from the rest
//! of the connection.

use std::sync::Arc;

use tokio::io::ReadHalf;

use super::{cleanup, stream::Socket, wire::Frame, ConnectionInner};
use crate::event::ConnectionClosedReason;

pub(super) async fn run(inner: Arc<ConnectionInner>, mut read_half: ReadHalf<Socket>) {
    loop {
        let frame = match Frame::read_from(&mut read_half).await {
            Ok(f) => f,
            Err(_e) => {
                // The socket died out from under us: run the same cleanup
                // sequence `Connection::close` would, so every ticket and
                // stream-slot waiter is released instead of hanging
                // forever on a reader that is no longer running. Don't
                // abort this task's own `JoinHandle` — a task awaiting its
                // own abort would deadlock; returning below is enough.
                cleanup(&inner, ConnectionClosedReason::Error, false).await;
                return;
            }
        };

        if frame.stream == super::wire::EVENT_STREAM_ID {
            match super::server_event::decode(&frame.body) {
                Ok(event) => inner.events.emit(Arc::new(event)),
                Err(_e) => {
                    #[cfg(feature = "tracing-unstable")]
                    tracing::warn!(addr = %inner.addr, "dropping unparseable server event frame");
                }
            }
            continue;
        }

        let idx = frame.stream as usize;
        let Some(cell) = inner.streams.get(idx) else {
            continue;
        };

        let slot = cell.lock().await.clone();
        match slot {
            Some(slot) => {
                // `put` returns false when the requester already timed out
                // and killed the slot; in that case the ticket was never
                // reclaimed by the requester (spec.md §4.1), so the reader
                // reclaims it here now that the stale response has finally
                // arrived.
                if !slot.put(frame) {
                    *cell.lock().await = None;
                    inner.tickets.mark_available(idx as u16).await;
                }
            }
            None => {
                // No one is waiting on this stream id at all; nothing to
                // reclaim since the ticket was already returned.
            }
        }
    }
}
