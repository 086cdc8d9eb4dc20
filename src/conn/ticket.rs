//! Bounded allocator of stream identifiers `[0..N-1]`, the systems-language
//! shape of a counting semaphore plus a free-id set (spec.md §9's
//! "primitive concurrency objects" note).

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::error::{Error, Result};

struct State {
    free: VecDeque<u16>,
    closed: Option<Error>,
}

/// Bounded multiset of free stream ids. `get` blocks until an id is
/// available or the pool is closed; `mark_available` returns an id to the
/// free set; `close` fails all current and future waiters with the same
/// error, matching spec.md §4.2.
pub(crate) struct TicketPool {
    state: Mutex<State>,
    notify: Notify,
}

impl TicketPool {
    pub(crate) fn new(n: u16) -> Self {
        Self {
            state: Mutex::new(State {
                free: (0..n).collect(),
                closed: None,
            }),
            notify: Notify::new(),
        }
    }

    /// Acquire a free stream id, blocking until one is available or the pool
    /// closes. FIFO order over waiters-notified-since-last-wake is fair
    /// enough that no id starves indefinitely under steady demand, since
    /// every `mark_available` wakes exactly one waiter via `Notify`.
    pub(crate) async fn get(&self) -> Result<u16> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(err) = &state.closed {
                    return Err(err.clone());
                }
                if let Some(id) = state.free.pop_front() {
                    return Ok(id);
                }
            }
            self.notify.notified().await;
        }
    }

    pub(crate) async fn mark_available(&self, id: u16) {
        let mut state = self.state.lock().await;
        if state.closed.is_none() {
            state.free.push_back(id);
        }
        drop(state);
        self.notify.notify_one();
    }

    pub(crate) async fn close(&self, err: Error) {
        let mut state = self.state.lock().await;
        if state.closed.is_none() {
            state.closed = Some(err);
        }
        drop(state);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn acquires_distinct_ids_up_to_capacity() {
        let pool = TicketPool::new(2);
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        assert_ne!(a, b);
        assert!(a < 2 && b < 2);
    }

    #[tokio::test]
    async fn blocks_when_exhausted_then_unblocks_on_release() {
        let pool = std::sync::Arc::new(TicketPool::new(1));
        let first = pool.get().await.unwrap();

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.get().await.unwrap() });

        // Give the waiter a chance to block on the ticket pool.
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        pool.mark_available(first).await;
        let got = waiter.await.unwrap();
        assert_eq!(got, first);
    }

    #[tokio::test]
    async fn close_fails_all_waiters() {
        let pool = TicketPool::new(0);
        pool.close(ErrorKind::InternalError("shutdown".into()).into())
            .await;
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InternalError(_)));
    }

    #[tokio::test]
    async fn conservation_no_id_returned_twice_without_reacquire() {
        let pool = TicketPool::new(4);
        let mut acquired = Vec::new();
        for _ in 0..4 {
            acquired.push(pool.get().await.unwrap());
        }
        acquired.sort_unstable();
        assert_eq!(acquired, vec![0, 1, 2, 3]);
        for id in acquired {
            pool.mark_available(id).await;
        }
        let mut reacquired = Vec::new();
        for _ in 0..4 {
            reacquired.push(pool.get().await.unwrap());
        }
        reacquired.sort_unstable();
        assert_eq!(reacquired, vec![0, 1, 2, 3]);
    }
}
