//! Uniform-random selection among up hosts, per spec.md §4.5.

use std::sync::Mutex;

use rand::seq::IteratorRandom;

use crate::types::{Host, HostEvent};

use super::LoadBalancingPolicy;

struct Entry {
    host: Host,
    up: bool,
}

pub struct RandomPolicy {
    hosts: Mutex<Vec<Entry>>,
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            hosts: Mutex::new(Vec::new()),
        }
    }
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingPolicy for RandomPolicy {
    fn setup(&self, hosts: &[Host]) {
        *self.hosts.lock().unwrap() = hosts.iter().cloned().map(|host| Entry { host, up: true }).collect();
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
        guard.iter().filter(|e| e.up).choose(&mut rand::rng()).map(|e| e.host.clone())
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
        "Random".to_string()
    }
}
