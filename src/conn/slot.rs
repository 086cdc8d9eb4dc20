//! Single-shot rendezvous cell with cancellation (spec.md §4.3's "sync
//! slot"). Used both as the generic primitive and, instantiated with
//! `Frame`, as the per-stream "stream slot" described in the data model:
//! created empty, filled once by the reader task, and killed once by a
//! response timeout or connection shutdown. `tokio::sync::oneshot` cannot
//! be reused for the "put returns false if already closed" / "kill only the
//! current waiter" semantics this needs, so it is hand-rolled.

use tokio::sync::Notify;

use crate::error::Error;

enum State<T> {
    Empty,
    Filled(T),
    Closed(Error),
}

pub(crate) struct SyncSlot<T> {
    state: std::sync::Mutex<State<T>>,
    notify: Notify,
}

impl<T> SyncSlot<T> {
    pub(crate) fn create() -> Self {
        Self {
            state: std::sync::Mutex::new(State::Empty),
            notify: Notify::new(),
        }
    }

    /// Fill the slot. Returns `true` if a waiter will receive `x` (the slot
    /// was empty), `false` if the slot was already closed.
    pub(crate) fn put(&self, x: T) -> bool {
        let mut state = self.state.lock().unwrap();
        match &*state {
            State::Empty => {
                *state = State::Filled(x);
                drop(state);
                self.notify.notify_waiters();
                true
            }
            State::Filled(_) | State::Closed(_) => false,
        }
    }

    /// Block until `put` or `close`/`kill`. Consumes the filled value; a
    /// slot is meant to be awaited exactly once.
    pub(crate) async fn get(&self) -> Result<T, Error> {
        loop {
            // Register for notification *before* checking state: `notify_waiters`
            // (used by `put`/`close`) stores no permit, it only wakes tasks
            // already registered. Checking state first and awaiting
            // `notified()` second leaves a window where a `put` landing in
            // between is never observed, so the two must happen in this
            // order every iteration.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                match &*state {
                    State::Filled(_) => {
                        let prior = std::mem::replace(&mut *state, State::Empty);
                        if let State::Filled(x) = prior {
                            return Ok(x);
                        }
                        unreachable!()
                    }
                    State::Closed(e) => return Err(e.clone()),
                    State::Empty => {}
                }
            }
            notified.await;
        }
    }

    /// Close the slot: all pending and future `get`s fail with `err`. Once
    /// closed, the slot never transitions again (monotonicity), so a
    /// subsequent `put` is a no-op returning `false`.
    pub(crate) fn close(&self, err: Error) {
        let mut state = self.state.lock().unwrap();
        if matches!(&*state, State::Empty) {
            *state = State::Closed(err);
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Abort whatever waiter is currently blocked on `get`, releasing it
    /// with `err`. Semantically identical to `close` here: the slot is
    /// single-shot per request, so "abort the current waiter" and "close
    /// the slot" coincide. The distinct name mirrors spec.md's distinction
    /// between a targeted response-timeout kill and a wholesale shutdown
    /// close.
    pub(crate) fn kill(&self, err: Error) {
        self.close(err);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let slot: SyncSlot<u32> = SyncSlot::create();
        assert!(slot.put(42));
        assert_eq!(slot.get().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn get_blocks_until_put() {
        let slot = std::sync::Arc::new(SyncSlot::<u32>::create());
        let slot2 = slot.clone();
        let handle = tokio::spawn(async move { slot2.get().await });
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        slot.put(7);
        assert_eq!(handle.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn close_then_put_fails_and_get_fails() {
        let slot: SyncSlot<u32> = SyncSlot::create();
        slot.close(ErrorKind::InternalError("gone".into()).into());
        assert!(!slot.put(1));
        let err = slot.get().await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InternalError(_)));
    }

    #[tokio::test]
    async fn kill_releases_waiter_with_error() {
        let slot = std::sync::Arc::new(SyncSlot::<u32>::create());
        let slot2 = slot.clone();
        let handle = tokio::spawn(async move { slot2.get().await });
        tokio::task::yield_now().await;
        slot.kill(ErrorKind::ResponseTimeout(crate::types::InetAddr::new(
            "127.0.0.1:9042".parse().unwrap(),
        ))
        .into());
        assert!(handle.await.unwrap().is_err());
    }
}
