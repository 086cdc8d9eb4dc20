//! Round-robin restricted to hosts in a configured local datacentre, per
//! spec.md §4.5's "datacentre-filtered round-robin" built-in.

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

pub struct DcAwareRoundRobin {
    local_dc: String,
    hosts: Mutex<Vec<Entry>>,
    cursor: AtomicUsize,
}

impl DcAwareRoundRobin {
    pub fn new(local_dc: impl Into<String>) -> Self {
        Self {
            local_dc: local_dc.into(),
            hosts: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancingPolicy for DcAwareRoundRobin {
    fn setup(&self, hosts: &[Host]) {
        let mut guard = self.hosts.lock().unwrap();
        *guard = hosts
            .iter()
            .filter(|h| h.datacenter == self.local_dc)
            .cloned()
            .map(|host| Entry { host, up: true })
            .collect();
    }

    fn on_event(&self, event: &HostEvent) {
        let mut guard = self.hosts.lock().unwrap();
        match event {
            HostEvent::New(host) if host.datacenter == self.local_dc => {
                if !guard.iter().any(|e| e.host.addr == host.addr) {
                    guard.push(Entry { host: host.clone(), up: true });
                }
            }
            HostEvent::New(_) => {}
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
        for i in 0..n {
            let idx = (self.cursor.fetch_add(1, Ordering::Relaxed) + i) % n;
            if guard[idx].up {
                return Some(guard[idx].host.clone());
            }
        }
        None
    }

    fn acceptable(&self, host: &Host) -> bool {
        host.datacenter == self.local_dc
    }

    fn host_count(&self) -> usize {
        self.hosts.lock().unwrap().iter().filter(|e| e.up).count()
    }

    fn current(&self) -> Vec<Host> {
        self.hosts.lock().unwrap().iter().filter(|e| e.up).map(|e| e.host.clone()).collect()
    }

    fn display(&self) -> String {
        format!("DcAwareRoundRobin({})", self.local_dc)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::InetAddr;

    fn host(port: u16, dc: &str) -> Host {
        Host::new(InetAddr::new(format!("127.0.0.1:{port}").parse().unwrap()), dc, "r1")
    }

    #[test]
    fn filters_out_remote_datacentre_hosts() {
        let policy = DcAwareRoundRobin::new("dc1");
        policy.setup(&[host(1, "dc1"), host(2, "dc2")]);
        assert_eq!(policy.current().len(), 1);
        assert_eq!(policy.select().unwrap().addr, host(1, "dc1").addr);
    }

    #[test]
    fn acceptable_rejects_other_datacentres_at_discovery_time() {
        let policy = DcAwareRoundRobin::new("dc1");
        assert!(policy.acceptable(&host(1, "dc1")));
        assert!(!policy.acceptable(&host(2, "dc2")));
    }
}
