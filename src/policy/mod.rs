//! Load-balancing policies (spec.md §4.5): given the current host
//! registry, decide which host serves the next request. A pluggable
//! "which servers are suitable" decision consulted by the request path,
//! expressed as a stateful trait object rather than a data enum, since
//! round-robin order is internal mutable state a plain predicate can't
//! carry.

mod dc_aware;
mod random;
mod round_robin;

use std::sync::Arc;

use crate::types::{Host, HostEvent};

pub use dc_aware::DcAwareRoundRobin;
pub use random::RandomPolicy;
pub use round_robin::RoundRobin;

/// The pluggable host-selection strategy. Implementations must tolerate
/// concurrent `select` calls from many in-flight requests at once.
pub trait LoadBalancingPolicy: Send + Sync {
    /// Called once, at controller start, with the hosts discovered so far.
    fn setup(&self, hosts: &[Host]);

    /// Called on every topology/status change the controller observes.
    fn on_event(&self, event: &HostEvent);

    /// Pick the next host to try. Returns `None` if no host is currently
    /// selectable.
    fn select(&self) -> Option<Host>;

    /// Called at discovery time to decide whether a newly seen host should
    /// ever be considered, independent of its current up/down status.
    fn acceptable(&self, host: &Host) -> bool;

    /// Upper bound on how many distinct hosts `select` can return; the
    /// request dispatcher uses this to bound its per-request retry loop
    /// over hosts (spec.md §4.10).
    fn host_count(&self) -> usize;

    /// All hosts this policy currently considers selectable, in its
    /// internal order.
    fn current(&self) -> Vec<Host>;

    /// A short human-readable name, used in logging.
    fn display(&self) -> String;
}

/// A factory so [`crate::config::ClusterConfig`] can own a
/// policy-construction recipe (rather than a pre-built, already-stateful
/// policy) and hand out a fresh instance per `Session`.
#[derive(Clone)]
pub struct PolicyFactory(Arc<dyn Fn() -> Arc<dyn LoadBalancingPolicy> + Send + Sync>);

impl PolicyFactory {
    pub fn new(f: impl Fn() -> Arc<dyn LoadBalancingPolicy> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn build(&self) -> Arc<dyn LoadBalancingPolicy> {
        (self.0)()
    }

    pub fn round_robin() -> Self {
        Self::new(|| Arc::new(RoundRobin::new()))
    }

    pub fn random() -> Self {
        Self::new(|| Arc::new(RandomPolicy::new()))
    }

    pub fn dc_aware(local_dc: impl Into<String> + Clone + Send + Sync + 'static) -> Self {
        Self::new(move || Arc::new(DcAwareRoundRobin::new(local_dc.clone())))
    }
}
