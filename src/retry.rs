//! Retry policy (spec.md §4.10 steps 2–3, 6–7): how many attempts, how
//! send/response timeouts shift per attempt, whether a reduced consistency
//! applies, exponential backoff between attempts, and which of the CQL
//! server-error kinds are worth retrying at all.

use std::time::Duration;

use crate::{config::RetrySettings, error::Error, types::Consistency};

pub(crate) struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub(crate) fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.settings.max_attempts
    }

    /// Exponential backoff with a hard cap, applied between attempts
    /// (i.e. never before attempt 0).
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let scaled = self.settings.backoff_base.saturating_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX));
        scaled.min(self.settings.backoff_cap)
    }

    /// Applies the configured send-timeout delta for `attempt`, per
    /// spec.md §4.10 step 3 ("on i>=1 ... sendTimeout and responseTimeout
    /// shift by configured deltas").
    pub(crate) fn adjust_send_timeout(&self, attempt: u32, base: Duration) -> Duration {
        if attempt == 0 {
            return base;
        }
        apply_delta(base, self.settings.send_timeout_delta)
    }

    pub(crate) fn adjust_response_timeout(&self, attempt: u32, base: Duration) -> Duration {
        if attempt == 0 {
            return base;
        }
        apply_delta(base, self.settings.recv_timeout_delta)
    }

    /// The consistency to use for `attempt`, if the policy is configured to
    /// downgrade on retries.
    pub(crate) fn consistency_for(&self, attempt: u32, original: Consistency) -> Consistency {
        if attempt == 0 {
            return original;
        }
        self.settings.reduced_consistency.unwrap_or(original)
    }

    /// Whether a server error surfaced mid-retry is worth retrying at all
    /// (spec.md §4.10 step 6): {ReadTimeout, WriteTimeout, Overloaded,
    /// Unavailable, ServerError}.
    pub(crate) fn is_retryable(&self, err: &Error) -> bool {
        err.is_retryable_server_error()
    }
}

fn apply_delta(base: Duration, delta_ms: i64) -> Duration {
    let base_ms = base.as_millis() as i64;
    let adjusted = (base_ms + delta_ms).max(0);
    Duration::from_millis(adjusted as u64)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_is_zero_on_the_first_attempt() {
        let policy = RetryPolicy::new(RetrySettings::default());
        assert_eq!(policy.backoff(0), Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let settings = RetrySettings::default()
            .with_max_attempts(5);
        let policy = RetryPolicy::new(settings);
        let b1 = policy.backoff(1);
        let b2 = policy.backoff(2);
        assert!(b2 >= b1);
        assert!(policy.backoff(30) <= Duration::from_secs(5));
    }

    #[test]
    fn consistency_only_changes_after_the_first_attempt() {
        let settings = RetrySettings::default().with_reduced_consistency(Consistency::One);
        let policy = RetryPolicy::new(settings);
        assert_eq!(policy.consistency_for(0, Consistency::Quorum), Consistency::Quorum);
        assert_eq!(policy.consistency_for(1, Consistency::Quorum), Consistency::One);
    }
}
