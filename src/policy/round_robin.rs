//! Plain round-robin over every host currently marked up, the simplest of
//! spec.md §4.5's three built-in policies.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use crate::types::{Host, HostEvent};

use super::LoadBalancingPolicy;

struct Entry {
    host: Host,
    up: bool,
}

pub struct RoundRobin {
    hosts: Mutex<Vec<Entry>>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            hosts: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingPolicy for RoundRobin {
    fn setup(&self, hosts: &[Host]) {
        let mut guard = self.hosts.lock().unwrap();
        *guard = hosts
            .iter()
            .cloned()
            .map(|host| Entry { host, up: true })
            .collect();
    }

    fn on_event(&self, event: &HostEvent) {
        let mut guard = self.hosts.lock().unwrap();
        match event {
            HostEvent::New(host) => {
                if !guard.iter().any(|e| e.host.addr == host.addr) {
                    guard.push(Entry { host: host.clone(), up: true });
                }
            }
            HostEvent::Gone(addr) => guard.retain(|e| e.host.addr != *addr),
            HostEvent::Up(addr) => {
                if let Some(e) = guard.iter_mut().find(|e| e.host.addr == *addr) {
                    e.up = true;
                }
            }
            HostEvent::Down(addr) => {
                if let Some(e) = guard.iter_mut().find(|e| e.host.addr == *addr) {
                    e.up = false;
                }
            }
        }
    }

    fn select(&self) -> Option<Host> {
        let guard = self.hosts.lock().unwrap();
        let n = guard.len();
        if n == 0 {
            return None;
        }
        // Scan starting from the next cursor position so repeated `select`
        // calls cycle round-robin even with concurrent callers; the exact
        // interleaving under contention is unspecified, only fairness over
        // time is promised.
        for i in 0..n {
            let idx = (self.cursor.fetch_add(1, Ordering::Relaxed) + i) % n;
            if guard[idx].up {
                return Some(guard[idx].host.clone());
            }
        }
        None
    }

    fn acceptable(&self, _host: &Host) -> bool {
        true
    }

    fn host_count(&self) -> usize {
        self.hosts.lock().unwrap().iter().filter(|e| e.up).count()
    }

    fn current(&self) -> Vec<Host> {
        self.hosts.lock().unwrap().iter().filter(|e| e.up).map(|e| e.host.clone()).collect()
    }

    fn display(&self) -> String {
        "RoundRobin".to_string()
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
    fn cycles_through_all_up_hosts() {
        let policy = RoundRobin::new();
        policy.setup(&[host(1), host(2), host(3)]);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..3 {
            seen.insert(policy.select().unwrap().addr);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn skips_hosts_marked_down() {
        let policy = RoundRobin::new();
        policy.setup(&[host(1), host(2)]);
        policy.on_event(&HostEvent::Down(host(1).addr));
        for _ in 0..5 {
            assert_eq!(policy.select().unwrap().addr, host(2).addr);
        }
    }

    #[test]
    fn selects_none_when_every_host_is_down() {
        let policy = RoundRobin::new();
        policy.setup(&[host(1)]);
        policy.on_event(&HostEvent::Down(host(1).addr));
        assert!(policy.select().is_none());
    }
}
