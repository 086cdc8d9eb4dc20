//! Per-host reachability probe (spec.md §4.8): sleep, probe, react, repeat,
//! with exponential backoff between probes capped at an upper bound. Exits
//! the moment the host answers, rather than continuing on a fixed
//! heartbeat cadence.

use std::time::Duration;

use crate::{
    config::ConnectionSettings,
    event::EventEmitter,
    pool::ConnectionPool,
    types::{InetAddr, ProtocolVersion},
};

const STEP: Duration = Duration::from_millis(50);

/// Computes `maxN = floor(log2(upper_bound / 50ms))`, the ceiling on the
/// doubling exponent so the probe interval never exceeds `upper_bound`.
fn max_exponent(upper_bound: Duration) -> u32 {
    let ratio = (upper_bound.as_millis() / STEP.as_millis().max(1)).max(1);
    63 - (ratio as u64).leading_zeros()
}

fn delay_for(n: u32, max_n: u32) -> Duration {
    STEP * 2u32.pow(n.min(max_n))
}

/// Runs the probe loop for `addr` until it answers a ping, then returns.
/// Callers spawn this as a job in the [`crate::jobs::JobsRegistry`] keyed
/// by `addr` and react to its return by emitting `HostUp` and marking the
/// host up in the registry and policy.
pub(crate) async fn run(
    addr: InetAddr,
    version: ProtocolVersion,
    settings: ConnectionSettings,
    emitter: EventEmitter,
    initial: Duration,
    upper_bound: Duration,
) {
    tokio::time::sleep(initial).await;

    let max_n = max_exponent(upper_bound);
    let mut n = 0u32;
    loop {
        match ConnectionPool::ping(addr, version, settings.clone(), emitter.clone()).await {
            Ok(()) => return,
            Err(_) => {
                let delay = delay_for(n, max_n);
                tokio::time::sleep(delay).await;
                n += 1;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn max_exponent_bounds_delay_at_roughly_the_upper_bound() {
        let max_n = max_exponent(Duration::from_secs(60));
        let delay = delay_for(max_n, max_n);
        assert!(delay <= Duration::from_secs(64) && delay >= Duration::from_secs(32));
    }

    #[test]
    fn delay_doubles_each_step_until_capped() {
        let max_n = max_exponent(Duration::from_secs(60));
        assert_eq!(delay_for(0, max_n), Duration::from_millis(50));
        assert_eq!(delay_for(1, max_n), Duration::from_millis(100));
        assert_eq!(delay_for(2, max_n), Duration::from_millis(200));
    }
}
