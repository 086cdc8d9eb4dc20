//! Jobs registry (spec.md §4.7): at most one live background task per
//! `InetAddr` key — used for per-host monitor loops and prepare-all fan
//! outs. One named background task per resource, tracked so a later
//! event can cancel and replace it.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;

use crate::types::InetAddr;

pub(crate) struct JobsRegistry {
    jobs: Mutex<HashMap<InetAddr, JoinHandle<()>>>,
}

impl JobsRegistry {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// If `replace` is true or no job exists for `key`, cancel any prior
    /// job and start `task`; otherwise leave the existing job running.
    pub(crate) fn add(&self, key: InetAddr, replace: bool, task: JoinHandle<()>) {
        let mut jobs = self.jobs.lock().unwrap();
        if replace || !jobs.contains_key(&key) {
            if let Some(old) = jobs.insert(key, task) {
                old.abort();
            }
        } else {
            task.abort();
        }
    }

    pub(crate) fn show_jobs(&self) -> Vec<InetAddr> {
        self.jobs.lock().unwrap().keys().copied().collect()
    }

    pub(crate) fn remove(&self, key: InetAddr) {
        if let Some(job) = self.jobs.lock().unwrap().remove(&key) {
            job.abort();
        }
    }

    pub(crate) fn destroy(&self) {
        for (_, job) in self.jobs.lock().unwrap().drain() {
            job.abort();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::InetAddr;

    fn addr(port: u16) -> InetAddr {
        InetAddr::new(format!("127.0.0.1:{port}").parse().unwrap())
    }

    #[tokio::test]
    async fn replace_cancels_the_prior_job() {
        let registry = JobsRegistry::new();
        let key = addr(1);
        let first = tokio::spawn(async { std::future::pending::<()>().await });
        registry.add(key, true, first);
        let second = tokio::spawn(async { std::future::pending::<()>().await });
        registry.add(key, true, second);
        assert_eq!(registry.show_jobs(), vec![key]);
    }

    #[tokio::test]
    async fn no_replace_leaves_an_existing_job_running_and_cancels_the_new_one() {
        let registry = JobsRegistry::new();
        let key = addr(2);
        let first = tokio::spawn(async { std::future::pending::<()>().await });
        registry.add(key, true, first);
        let second = tokio::spawn(async { std::future::pending::<()>().await });
        registry.add(key, false, second);
        assert_eq!(registry.show_jobs(), vec![key]);
    }

    #[tokio::test]
    async fn destroy_clears_every_job() {
        let registry = JobsRegistry::new();
        registry.add(addr(1), true, tokio::spawn(async { std::future::pending::<()>().await }));
        registry.add(addr(2), true, tokio::spawn(async { std::future::pending::<()>().await }));
        registry.destroy();
        assert!(registry.show_jobs().is_empty());
    }
}
