//! Shared helper allowing many cheap per-operation deadlines (spec.md
//! §2), wrapping `tokio::time` rather than a literal timer wheel. Adds a
//! `fire_after` primitive: a cancellable background alarm used when a
//! timeout must raise an *asynchronous* notification against a caller that
//! is not the one awaiting the timeout future (spec.md §4.1: "on response
//! timeout, an asynchronous notification is raised on the caller").

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Cheap, clonable handle; internally stateless because `tokio::time`
/// itself is the shared clock authority.
#[derive(Clone, Copy, Default)]
pub(crate) struct TimeoutManager;

impl TimeoutManager {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Await `future`, returning `Err(on_timeout())` if `duration` elapses
    /// first.
    pub(crate) async fn apply<F, T>(&self, duration: Duration, future: F, on_timeout: impl FnOnce() -> Error) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(duration, future).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        }
    }

    /// Schedule `action` to run after `duration` unless the returned handle
    /// is dropped or aborted first. Used to kill a stream slot out-of-band
    /// when a response never arrives.
    pub(crate) fn fire_after<F>(&self, duration: Duration, action: F) -> TimeoutHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            action.await;
        });
        TimeoutHandle { handle }
    }
}

/// A scheduled alarm. Dropping or calling `cancel` prevents the action from
/// firing if it has not already.
pub(crate) struct TimeoutHandle {
    handle: JoinHandle<()>,
}

impl TimeoutHandle {
    pub(crate) fn cancel(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn apply_returns_ok_when_future_completes_first() {
        let mgr = TimeoutManager::new();
        let result = mgr
            .apply(
                Duration::from_millis(100),
                async { Ok::<_, Error>(5) },
                || ErrorKind::InternalError("timed out".into()).into(),
            )
            .await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn apply_times_out() {
        let mgr = TimeoutManager::new();
        let result: Result<()> = mgr
            .apply(
                Duration::from_millis(5),
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                },
                || ErrorKind::InternalError("timed out".into()).into(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fire_after_can_be_cancelled() {
        let mgr = TimeoutManager::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = mgr.fire_after(Duration::from_millis(5), async move {
            fired2.store(true, Ordering::SeqCst);
        });
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
