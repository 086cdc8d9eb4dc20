//! Host registry (spec.md §3's "host-to-pool map" and §4.9's discovery
//! bookkeeping): the set of known cluster members, their up/down status,
//! and their per-host connection pool, mutated under a single lock so the
//! controller's race-safe "create pool if missing" check-then-act is
//! actually atomic.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{pool::ConnectionPool, types::{Host, InetAddr}};

struct Entry {
    host: Host,
    up: bool,
    pool: Option<ConnectionPool>,
}

/// The cluster controller's view of membership: every known host, its
/// reachability, and its pool (once created).
pub(crate) struct HostMap {
    entries: Mutex<HashMap<InetAddr, Entry>>,
}

impl HostMap {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, host: Host, up: bool) {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(host.addr)
            .and_modify(|e| {
                e.up = up;
                e.host = host.clone();
            })
            .or_insert(Entry { host, up, pool: None });
    }

    pub(crate) fn remove(&self, addr: InetAddr) -> Option<ConnectionPool> {
        self.entries.lock().unwrap().remove(&addr).and_then(|e| e.pool)
    }

    pub(crate) fn contains(&self, addr: InetAddr) -> bool {
        self.entries.lock().unwrap().contains_key(&addr)
    }

    pub(crate) fn mark_up(&self, addr: InetAddr) {
        if let Some(e) = self.entries.lock().unwrap().get_mut(&addr) {
            e.up = true;
        }
    }

    pub(crate) fn mark_down(&self, addr: InetAddr) {
        if let Some(e) = self.entries.lock().unwrap().get_mut(&addr) {
            e.up = false;
        }
    }

    pub(crate) fn host(&self, addr: InetAddr) -> Option<Host> {
        self.entries.lock().unwrap().get(&addr).map(|e| e.host.clone())
    }

    pub(crate) fn pool(&self, addr: InetAddr) -> Option<ConnectionPool> {
        self.entries.lock().unwrap().get(&addr).and_then(|e| e.pool.clone())
    }

    /// Returns the existing pool for `addr`, or atomically builds and
    /// stores one via `make` if none exists yet — the "creating one if
    /// missing (race-safe under the host-map transaction)" step of
    /// spec.md §4.10's `request1`.
    pub(crate) fn pool_or_create(&self, addr: InetAddr, make: impl FnOnce() -> ConnectionPool) -> Option<ConnectionPool> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&addr)?;
        if entry.pool.is_none() {
            entry.pool = Some(make());
        }
        entry.pool.clone()
    }

    pub(crate) fn all_hosts(&self) -> Vec<Host> {
        self.entries.lock().unwrap().values().map(|e| e.host.clone()).collect()
    }

    pub(crate) fn all_pools(&self) -> Vec<ConnectionPool> {
        self.entries.lock().unwrap().values().filter_map(|e| e.pool.clone()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::InetAddr;

    fn host(port: u16) -> Host {
        Host::new(InetAddr::new(format!("127.0.0.1:{port}").parse().unwrap()), "dc1", "r1")
    }

    #[test]
    fn insert_then_remove_round_trips() {
        let map = HostMap::new();
        let h = host(1);
        map.insert(h.clone(), true);
        assert!(map.contains(h.addr));
        map.remove(h.addr);
        assert!(!map.contains(h.addr));
    }

    #[test]
    fn mark_down_then_up_flips_status_without_dropping_the_entry() {
        let map = HostMap::new();
        let h = host(1);
        map.insert(h.clone(), true);
        map.mark_down(h.addr);
        map.mark_up(h.addr);
        assert!(map.contains(h.addr));
    }
}
